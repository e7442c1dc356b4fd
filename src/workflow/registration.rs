//! Invitation tokens and account creation.

use chrono::Duration;
use serde::Serialize;

use crate::AppState;
use crate::crypto::random_token;
use crate::database::{Guarded, TokenStore};
use crate::error::{Result, ServerError};
use crate::model::{Account, EmployeeProfile, RegistrationToken, TokenState};

use super::housing;

/// Issued invitation as shown in the HR history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub email: String,
    pub name: String,
    pub link: String,
    pub is_used: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Freshly created account with its session.
#[derive(Debug, Clone)]
pub struct Registered {
    pub account: Account,
    pub session: String,
}

fn classify(token: &RegistrationToken, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
    match token.state(now) {
        TokenState::Issued => Ok(()),
        TokenState::Consumed => Err(ServerError::AlreadyUsed),
        TokenState::Expired => Err(ServerError::Expired),
    }
}

/// Create an invitation and email it. If the email cannot be dispatched the
/// token is deleted again.
pub async fn issue(state: &AppState, issuer: &Account, email: &str, name: &str) -> Result<RegistrationToken> {
    let email = email.trim().to_lowercase();
    let name = name.trim().to_owned();
    let now = state.clock.now();

    let purged = state.db.purge_expired_tokens(&email, now).await?;
    if purged > 0 {
        tracing::debug!(%email, purged, "expired invitations removed");
    }

    let token = RegistrationToken {
        token: random_token(),
        email,
        name,
        is_used: false,
        expires_at: now + Duration::hours(state.config.registration.token_ttl_hours),
        created_by: issuer.id,
        created_at: now,
    };
    state.db.insert_token(&token).await?;

    if let Err(err) = state
        .mail
        .send_invitation(&token.email, &token.name, &token.token)
        .await
    {
        tracing::warn!(email = token.email, %err, "invitation not sent, token rolled back");

        return match state.db.delete_token(&token.token).await {
            Ok(()) => Err(err.into()),
            Err(cleanup) => Err(ServerError::PartialFailure {
                details: format!(
                    "invitation to {} failed ({err}) and the token could not be removed ({cleanup})",
                    token.email
                ),
            }),
        };
    }

    tracing::info!(email = token.email, issuer = %issuer.id, "registration token issued");
    metrics::counter!("registration_tokens_issued_total").increment(1);

    Ok(token)
}

/// Read-only check used by the registration page.
pub async fn validate(state: &AppState, token: &str) -> Result<RegistrationToken> {
    let stored = state
        .db
        .find_token(token)
        .await?
        .ok_or(ServerError::NotFound("registration token"))?;
    classify(&stored, state.clock.now())?;

    Ok(stored)
}

/// Consume `token` and create the account with a placeholder profile, then
/// try to house the new employee.
pub async fn register(state: &AppState, token: &str, username: &str, password: &str) -> Result<Registered> {
    // Fails fast with a precise error before paying for hashing.
    let invitation = validate(state, token).await?;

    let now = state.clock.now();
    let hash = state.crypto.pwd.hash_password(password)?;
    let account = Account::employee(username.trim().to_lowercase(), &invitation.email, hash, now);
    let profile = EmployeeProfile::placeholder(account.id, now);

    match state.db.consume_token(token, now, &account, &profile).await? {
        Guarded::Applied(()) => {},
        Guarded::Refused(Some(current)) => {
            classify(&current, now)?;
            return Err(ServerError::AlreadyUsed);
        },
        Guarded::Refused(None) => return Err(ServerError::NotFound("registration token")),
    }

    tracing::info!(user_id = %account.id, username = account.username, "account registered");
    metrics::counter!("registrations_total").increment(1);

    // Housing never blocks registration.
    match housing::assign(state, account.id).await {
        Ok(Some(house)) => tracing::debug!(user_id = %account.id, house_id = %house.id, "house assigned"),
        Ok(None) => {},
        Err(err) => tracing::warn!(user_id = %account.id, %err, "house assignment failed"),
    }

    let session = state.token.create(&account, now)?;

    Ok(Registered { account, session })
}

/// Every invitation, newest first.
pub async fn history(state: &AppState) -> Result<Vec<TokenRecord>> {
    let tokens = state.db.list_tokens().await?;

    Ok(tokens
        .into_iter()
        .map(|token| TokenRecord {
            link: state.config.invitation_link(&token.token),
            email: token.email,
            name: token.name,
            is_used: token.is_used,
            expires_at: token.expires_at,
            created_at: token.created_at,
        })
        .collect())
}
