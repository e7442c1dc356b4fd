use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Single-use invitation gating account creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    pub token: String,
    pub email: String,
    pub name: String,
    pub is_used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a [`RegistrationToken`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Issued,
    Consumed,
    Expired,
}

impl RegistrationToken {
    /// Expiry wins over consumption: a token past `expires_at` is reported
    /// as expired whether or not it was used.
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if self.expires_at <= now {
            TokenState::Expired
        } else if self.is_used {
            TokenState::Consumed
        } else {
            TokenState::Issued
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(is_used: bool, expires_in: Duration) -> RegistrationToken {
        let now = Utc::now();
        RegistrationToken {
            token: "abc".into(),
            email: "alice@x.com".into(),
            name: "Alice".into(),
            is_used,
            expires_at: now + expires_in,
            created_by: Uuid::new_v4(),
            created_at: now,
        }
    }

    #[test]
    fn test_expired_takes_precedence_over_used() {
        let now = Utc::now();
        assert_eq!(token(true, Duration::hours(-1)).state(now), TokenState::Expired);
        assert_eq!(token(false, Duration::hours(-1)).state(now), TokenState::Expired);
        assert_eq!(token(true, Duration::hours(1)).state(now), TokenState::Consumed);
        assert_eq!(token(false, Duration::hours(1)).state(now), TokenState::Issued);
    }
}
