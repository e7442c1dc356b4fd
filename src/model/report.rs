use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Account, labeled_enum};

labeled_enum! {
    pub enum ReportStatus {
        Open => "Open",
        InReview => "In Review",
        Closed => "Closed",
    }
}

/// Facility issue filed against a house.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportThread {
    pub id: Uuid,
    pub house_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: ReportStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub report_id: Uuid,
    pub message: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportThread {
    /// Only the author and HR see a thread and its comments.
    pub fn can_access(&self, actor: &Account) -> bool {
        actor.id == self.created_by || actor.is_hr()
    }
}
