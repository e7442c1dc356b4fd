use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ReviewStatus, labeled_enum};

labeled_enum! {
    /// OPT documents, declared in the order they must be approved.
    pub enum DocumentType {
        Receipt => "RECEIPT",
        Ead => "EAD",
        I983 => "I-983",
        I20 => "I-20",
    }
}

impl DocumentType {
    /// Storage slot used for the uploaded file.
    pub fn slot(&self) -> &'static str {
        match self {
            DocumentType::Receipt => "opt_receipt",
            DocumentType::Ead => "opt_ead",
            DocumentType::I983 => "i983",
            DocumentType::I20 => "i20",
        }
    }

    /// First type, in order, that is not approved yet. `None` once the
    /// whole sequence is approved.
    pub fn next_allowed(docs: &[OptDocument]) -> Option<DocumentType> {
        Self::ALL.iter().copied().find(|kind| {
            !docs
                .iter()
                .any(|doc| doc.document_type == *kind && doc.status == ReviewStatus::Approved)
        })
    }
}

/// Latest upload for one (account, document type) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_type: DocumentType,
    pub document_key: String,
    pub status: ReviewStatus,
    pub feedback: String,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OptDocument {
    pub fn pending(
        user_id: Uuid,
        document_type: DocumentType,
        document_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            document_type,
            document_key: document_key.into(),
            status: ReviewStatus::Pending,
            feedback: String::new(),
            reviewed_by: None,
            reviewed_at: None,
            updated_at: now,
        }
    }

    /// Overwrite in place with a new upload.
    pub fn resubmit(&mut self, document_key: impl Into<String>, now: DateTime<Utc>) {
        self.document_key = document_key.into();
        self.status = ReviewStatus::Pending;
        self.feedback.clear();
        self.reviewed_by = None;
        self.reviewed_at = None;
        self.updated_at = now;
    }
}
