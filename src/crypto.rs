//! Cryptographic helpers: password hashing, opaque secrets and URL signatures.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use validator::{ValidationError, ValidationErrors};

use crate::config::Argon2 as ArgonConfig;

/// Bytes of entropy behind every registration token.
pub const TOKEN_BYTES: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("signing key is empty")]
    EmptyKey,
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
        })
    }
}

/// Hex-encoded 256-bit random secret.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    fn invalid_credentials() -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.add(
            "password",
            ValidationError::new("invalid_credentials")
                .with_message("Invalid username or password.".into()),
        );
        errors
    }

    /// Verify password against a PHC.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> std::result::Result<(), ValidationErrors> {
        let parsed = PasswordHash::new(phc_hash).map_err(|_| Self::invalid_credentials())?;

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .map_err(|_| Self::invalid_credentials())
    }
}

/// HMAC-SHA256 signer for expiring links.
#[derive(Clone)]
pub struct Signer {
    mac: Hmac<Sha256>,
}

impl Signer {
    /// Create a new [`Signer`].
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        let mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| CryptoError::EmptyKey)?;
        Ok(Self { mac })
    }

    fn mac(&self, message: &str) -> Hmac<Sha256> {
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        mac
    }

    /// Hex signature of `message`.
    pub fn sign(&self, message: &str) -> String {
        hex::encode(self.mac(message).finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(bytes) => self.mac(message).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_config() -> ArgonConfig {
        ArgonConfig {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }
    }

    #[test]
    fn test_random_token() {
        let token = random_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, random_token());
    }

    #[test]
    fn test_password_roundtrip() {
        let pwd = PasswordManager::new(Some(cheap_config())).unwrap();
        let hash = pwd.hash_password("Secret123").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("Secret123", &hash).is_ok());
        assert!(pwd.verify_password("secret123", &hash).is_err());
        assert!(pwd.verify_password("Secret123", "not a phc").is_err());
    }

    #[test]
    fn test_signer() {
        let signer = Signer::new("key").unwrap();
        let signature = signer.sign("users/1/i20.pdf");

        assert!(signer.verify("users/1/i20.pdf", &signature));
        assert!(!signer.verify("users/2/i20.pdf", &signature));
        assert!(!signer.verify("users/1/i20.pdf", "zz"));
        assert!(Signer::new("").is_err());
    }
}
