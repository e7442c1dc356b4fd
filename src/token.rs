//! Manage session json web tokens.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Account, Role};

const DEFAULT_AUDIENCE: &str = "hiregate";
/// Session lifetime, in seconds.
pub const EXPIRATION_TIME: i64 = 60 * 60 * 3;

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Expiration time, in seconds since epoch.
    pub exp: i64,
    /// Issued at, in seconds since epoch.
    pub iat: i64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// Account ID.
    pub sub: String,
    pub role: Role,
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    name: String,
    audience: String,
}

impl TokenManager {
    /// Create a new [`TokenManager`] signing with HMAC-SHA256.
    pub fn new(name: &str, secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            name: name.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
        }
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Create a new session token for `account`.
    pub fn create(&self, account: &Account, now: DateTime<Utc>) -> Result<String> {
        let time = now.timestamp();
        let claims = Claims {
            aud: self.audience.clone(),
            exp: time + EXPIRATION_TIME,
            iat: time,
            iss: self.name.clone(),
            sub: account.id.to_string(),
            role: account.role,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.name]);

        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}
