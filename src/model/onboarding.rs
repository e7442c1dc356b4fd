use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ReviewStatus;

/// Submitted onboarding data awaiting or past HR review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ReviewStatus,
    pub feedback: String,
    /// Exactly what the employee sent, untouched by later profile edits.
    pub snapshot: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingApplication {
    /// Fresh pending submission.
    pub fn submitted(user_id: Uuid, snapshot: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: ReviewStatus::Pending,
            feedback: String::new(),
            snapshot,
            submitted_at: now,
            reviewed_at: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
