use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{OnboardingStatus, Role};

/// Identity able to log in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string.
    #[serde(skip)]
    pub password: String,
    pub role: Role,
    pub is_active: bool,
    /// Mirrors the onboarding application status once one exists.
    pub onboarding_status: OnboardingStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// New active employee account that has not started onboarding.
    pub fn employee(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password: password.into(),
            role: Role::Employee,
            is_active: true,
            onboarding_status: OnboardingStatus::NotStarted,
            created_at: now,
        }
    }

    /// New active HR account.
    pub fn hr(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Hr,
            onboarding_status: OnboardingStatus::Approved,
            ..Self::employee(username, email, password, now)
        }
    }

    pub fn is_hr(&self) -> bool {
        self.role == Role::Hr
    }
}
