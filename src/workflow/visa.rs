//! OPT document sequence: uploads, HR review, next step and reminders.
//!
//! Every read derives the next step from the current per-type statuses; no
//! progress marker is stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use crate::database::{AccountStore, DocumentStore, Guarded, ProfileStore};
use crate::error::{Result, ServerError};
use crate::mail::ReminderAction;
use crate::model::{Account, DocumentType, EmployeeProfile, OptDocument, ReviewStatus};

use super::review::{Decision, ReviewCoordinator};
use super::uploads::{self, Upload};

/// The single thing to happen next in an employee's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "documentType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    /// A rejected document must be uploaded again.
    Resubmit(DocumentType),
    /// HR has a pending document to review.
    AwaitReview(DocumentType),
    /// The employee has not uploaded this document yet.
    Upload(DocumentType),
    Complete,
}

impl NextAction {
    /// Rejections first, then pending reviews, then the first missing type.
    pub fn of(docs: &[OptDocument]) -> Self {
        let with_status = |status: ReviewStatus| {
            DocumentType::ALL.iter().copied().find(|kind| {
                docs.iter()
                    .any(|d| d.document_type == *kind && d.status == status)
            })
        };

        if let Some(kind) = with_status(ReviewStatus::Rejected) {
            return NextAction::Resubmit(kind);
        }
        if let Some(kind) = with_status(ReviewStatus::Pending) {
            return NextAction::AwaitReview(kind);
        }

        DocumentType::ALL
            .iter()
            .copied()
            .find(|kind| !docs.iter().any(|d| d.document_type == *kind))
            .map_or(NextAction::Complete, NextAction::Upload)
    }

    /// Employee-facing sentence.
    pub fn message(&self) -> String {
        match self {
            NextAction::Resubmit(kind) => {
                format!("Your {kind} was rejected. Please check feedback and re-upload.")
            },
            NextAction::AwaitReview(kind) => format!("Waiting for HR to approve your {kind}."),
            NextAction::Upload(kind) => format!("Please upload your {kind}."),
            NextAction::Complete => "All documents have been approved.".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    ReviewDoc,
    SendNotification,
}

/// Next step as shown on the HR dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HrStep {
    pub next_step: String,
    pub action_type: ActionType,
    pub pending_document: Option<OptDocument>,
}

impl HrStep {
    pub fn of(docs: &[OptDocument]) -> Option<Self> {
        let (next_step, action_type, pending) = match NextAction::of(docs) {
            NextAction::Resubmit(kind) => (
                format!("Employee must re-upload {kind}"),
                ActionType::SendNotification,
                None,
            ),
            NextAction::AwaitReview(kind) => (
                format!("Waiting for HR approval: {kind}"),
                ActionType::ReviewDoc,
                Some(kind),
            ),
            NextAction::Upload(kind) => (
                format!("Employee needs to upload {kind}"),
                ActionType::SendNotification,
                None,
            ),
            NextAction::Complete => return None,
        };

        Some(Self {
            next_step,
            action_type,
            pending_document: pending
                .and_then(|kind| docs.iter().find(|d| d.document_type == kind).cloned()),
        })
    }
}

/// Employee status page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub documents: Vec<OptDocument>,
    pub next_action: NextAction,
    pub next_allowed: Option<DocumentType>,
    pub message: String,
}

impl StatusPayload {
    pub fn of(documents: Vec<OptDocument>) -> Self {
        let next_action = NextAction::of(&documents);
        Self {
            next_allowed: DocumentType::next_allowed(&documents),
            message: next_action.message(),
            next_action,
            documents,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkAuthorizationView {
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
}

/// OPT employee with an open step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisaCase {
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub name: String,
    pub preferred_name: Option<String>,
    pub work_authorization: WorkAuthorizationView,
    #[serde(flatten)]
    pub step: HrStep,
}

/// Any OPT employee, open step or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisaRecord {
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub name: String,
    pub preferred_name: Option<String>,
    pub work_authorization: WorkAuthorizationView,
    pub next_step: Option<String>,
    pub action_type: Option<ActionType>,
    pub approved_documents: Vec<OptDocument>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub message_id: String,
    pub document_type: DocumentType,
    pub action: ReminderAction,
}

fn work_authorization(profile: &EmployeeProfile, now: DateTime<Utc>) -> WorkAuthorizationView {
    WorkAuthorizationView {
        title: profile.work_authorization.display_title(),
        start_date: profile.work_authorization.start_date,
        end_date: profile.work_authorization.end_date,
        days_remaining: profile.work_authorization.days_remaining(now),
    }
}

/// Visa cases require an approved onboarding on the OPT track.
pub async fn ensure_visa_case(state: &AppState, account: &Account) -> Result<EmployeeProfile> {
    if account.is_hr() || account.onboarding_status != crate::model::OnboardingStatus::Approved {
        return Err(ServerError::Forbidden("onboarding must be approved first"));
    }

    let profile = state
        .db
        .find_profile_by_user(account.id)
        .await?
        .ok_or(ServerError::NotFound("profile"))?;
    if !profile.is_opt_track() {
        return Err(ServerError::Forbidden("visa documents only apply to F1 CPT/OPT employees"));
    }

    Ok(profile)
}

pub async fn status(state: &AppState, account: &Account) -> Result<StatusPayload> {
    let documents = state.db.list_documents(account.id).await?;
    Ok(StatusPayload::of(documents))
}

/// Upload the next document of the sequence, or re-upload a rejected one.
pub async fn submit_document(
    state: &AppState,
    account: &Account,
    document_type: DocumentType,
    upload: Upload,
) -> Result<OptDocument> {
    // Cheap precheck so out-of-order files are never written.
    let documents = state.db.list_documents(account.id).await?;
    let next_allowed = DocumentType::next_allowed(&documents);
    if next_allowed != Some(document_type) {
        return Err(ServerError::OutOfOrder {
            requested: document_type,
            next_allowed,
        });
    }

    let previous = documents
        .iter()
        .find(|doc| doc.document_type == document_type)
        .map(|doc| doc.document_key.clone());

    record_upload(state, account, document_type, previous, upload).await
}

/// Store the file under a fresh key and point the document row at it. The
/// store re-checks the sequence, so a review landing after the precheck
/// still refuses the upload.
async fn record_upload(
    state: &AppState,
    account: &Account,
    document_type: DocumentType,
    previous: Option<String>,
    upload: Upload,
) -> Result<OptDocument> {
    // Each upload gets its own key: a refused upload must never touch the
    // file a reviewed document points at.
    let stored = uploads::store_revision(state, account.id, document_type.slot(), upload).await?;

    let submitted = state
        .db
        .submit_document(account.id, document_type, &stored.key, state.clock.now())
        .await;
    let outcome = match submitted {
        Ok(outcome) => outcome,
        Err(err) => {
            uploads::discard(state, &stored.key).await;
            return Err(err);
        },
    };

    match outcome {
        Guarded::Applied(document) => {
            if let Some(previous) = previous.filter(|key| *key != document.document_key) {
                uploads::discard(state, &previous).await;
            }

            tracing::info!(user_id = %account.id, %document_type, "visa document submitted");
            metrics::counter!(
                "visa_documents_submitted_total",
                "document_type" => document_type.as_str()
            )
            .increment(1);

            Ok(document)
        },
        Guarded::Refused(next_allowed) => {
            uploads::discard(state, &stored.key).await;

            Err(ServerError::OutOfOrder {
                requested: document_type,
                next_allowed,
            })
        },
    }
}

pub async fn review_document(state: &AppState, reviewer: &Account, id: Uuid, decision: Decision) -> Result<OptDocument> {
    ReviewCoordinator::review(state, id, reviewer, decision).await
}

async fn opt_profiles(state: &AppState) -> Result<Vec<EmployeeProfile>> {
    let mut profiles: Vec<_> = state
        .db
        .list_profiles()
        .await?
        .into_iter()
        .filter(EmployeeProfile::is_opt_track)
        .collect();
    profiles.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
    Ok(profiles)
}

/// OPT employees whose sequence is not complete.
pub async fn pending(state: &AppState) -> Result<Vec<VisaCase>> {
    let now = state.clock.now();
    let mut cases = Vec::new();

    for profile in opt_profiles(state).await? {
        let documents = state.db.list_documents(profile.user_id).await?;
        if let Some(step) = HrStep::of(&documents) {
            cases.push(VisaCase {
                user_id: profile.user_id,
                profile_id: profile.id,
                name: profile.full_name(),
                preferred_name: profile.preferred_name.clone(),
                work_authorization: work_authorization(&profile, now),
                step,
            });
        }
    }

    Ok(cases)
}

/// Every OPT employee, optionally filtered by a case-insensitive name.
pub async fn all(state: &AppState, search: Option<&str>) -> Result<Vec<VisaRecord>> {
    let now = state.clock.now();
    let search = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut records = Vec::new();
    for profile in opt_profiles(state).await? {
        if let Some(search) = &search {
            let names = [
                Some(profile.first_name.as_str()),
                Some(profile.last_name.as_str()),
                profile.preferred_name.as_deref(),
            ];
            let found = names
                .into_iter()
                .flatten()
                .any(|name| name.to_lowercase().contains(search.as_str()));
            if !found {
                continue;
            }
        }

        let documents = state.db.list_documents(profile.user_id).await?;
        let step = HrStep::of(&documents);
        records.push(VisaRecord {
            user_id: profile.user_id,
            profile_id: profile.id,
            name: profile.full_name(),
            preferred_name: profile.preferred_name.clone(),
            work_authorization: work_authorization(&profile, now),
            next_step: step.as_ref().map(|s| s.next_step.clone()),
            action_type: step.map(|s| s.action_type),
            approved_documents: documents
                .into_iter()
                .filter(|d| d.status == ReviewStatus::Approved)
                .collect(),
        });
    }

    Ok(records)
}

/// Email the employee about the document they have to act on.
pub async fn notify(state: &AppState, user_id: Uuid) -> Result<Reminder> {
    let account = state
        .db
        .find_account(user_id)
        .await?
        .ok_or(ServerError::NotFound("employee"))?;
    let profile = state
        .db
        .find_profile_by_user(user_id)
        .await?
        .ok_or(ServerError::NotFound("profile"))?;
    if !profile.is_opt_track() {
        return Err(ServerError::Forbidden("visa documents only apply to F1 CPT/OPT employees"));
    }

    let documents = state.db.list_documents(user_id).await?;
    let (document_type, action) = match NextAction::of(&documents) {
        NextAction::Resubmit(kind) => (kind, ReminderAction::Reupload),
        NextAction::Upload(kind) => (kind, ReminderAction::Upload),
        NextAction::AwaitReview(_) => {
            return Err(ServerError::InvalidState {
                entity: "visa case",
                current: "awaiting HR review".to_owned(),
                action: "notify",
            });
        },
        NextAction::Complete => {
            return Err(ServerError::InvalidState {
                entity: "visa case",
                current: "complete".to_owned(),
                action: "notify",
            });
        },
    };

    let message_id = state
        .mail
        .send_reminder(&account.email, profile.greeting_name(), document_type, action)
        .await?;

    tracing::info!(%user_id, %document_type, ?action, message_id, "visa reminder sent");

    Ok(Reminder {
        message_id,
        document_type,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::tests::Sent;
    use crate::router::tests::harness;
    use axum::body::Bytes;

    fn doc(kind: DocumentType, status: ReviewStatus) -> OptDocument {
        OptDocument {
            status,
            ..OptDocument::pending(Uuid::nil(), kind, "key", Utc::now())
        }
    }

    fn pdf() -> Upload {
        Upload {
            file_name: "scan.pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.7"),
        }
    }

    #[test]
    fn test_rejection_outranks_everything() {
        use DocumentType::*;
        use ReviewStatus::*;

        assert_eq!(NextAction::of(&[]), NextAction::Upload(Receipt));
        assert_eq!(
            NextAction::of(&[doc(Receipt, Pending), doc(Ead, Rejected)]),
            NextAction::Resubmit(Ead)
        );
        assert_eq!(
            NextAction::of(&[doc(Receipt, Approved), doc(Ead, Pending)]),
            NextAction::AwaitReview(Ead)
        );
        assert_eq!(
            NextAction::of(&[doc(Receipt, Approved), doc(Ead, Approved)]),
            NextAction::Upload(I983)
        );
        let all: Vec<_> = DocumentType::ALL.iter().map(|k| doc(*k, Approved)).collect();
        assert_eq!(NextAction::of(&all), NextAction::Complete);
        assert!(HrStep::of(&all).is_none());

        let step = HrStep::of(&[doc(Receipt, Pending)]).unwrap();
        assert_eq!(step.action_type, ActionType::ReviewDoc);
        assert_eq!(step.next_step, "Waiting for HR approval: RECEIPT");
        assert!(step.pending_document.is_some());

        let json = serde_json::to_value(NextAction::Resubmit(I983)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "RESUBMIT", "documentType": "I-983" }));
    }

    #[tokio::test]
    async fn test_sequential_scenario() {
        let harness = harness();
        let hr = harness.hr().await;
        let (alice, _) = harness.opt_employee("alice").await;

        let receipt = submit_document(&harness.state, &alice, DocumentType::Receipt, pdf())
            .await
            .unwrap();
        assert_eq!(receipt.status, ReviewStatus::Pending);
        let prefix = format!("users/{}/opt_receipt-", alice.id);
        assert!(receipt.document_key.starts_with(&prefix));
        assert!(receipt.document_key.ends_with(".pdf"));

        let err = submit_document(&harness.state, &alice, DocumentType::I983, pdf())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::OutOfOrder {
                requested: DocumentType::I983,
                next_allowed: Some(DocumentType::Receipt)
            }
        ));

        review_document(&harness.state, &hr, receipt.id, Decision::Approve)
            .await
            .unwrap();
        let ead = submit_document(&harness.state, &alice, DocumentType::Ead, pdf())
            .await
            .unwrap();
        review_document(&harness.state, &hr, ead.id, Decision::reject("blurry").unwrap())
            .await
            .unwrap();

        let payload = status(&harness.state, &alice).await.unwrap();
        assert_eq!(payload.next_action, NextAction::Resubmit(DocumentType::Ead));
        assert_eq!(payload.next_allowed, Some(DocumentType::Ead));
        assert_eq!(
            payload.message,
            "Your EAD was rejected. Please check feedback and re-upload."
        );

        // Re-upload overwrites the same row and drops the rejected file.
        let again = submit_document(&harness.state, &alice, DocumentType::Ead, pdf())
            .await
            .unwrap();
        assert_eq!(again.id, ead.id);
        assert_ne!(again.document_key, ead.document_key);
        assert_eq!(
            harness.files(alice.id),
            vec![again.document_key.clone(), receipt.document_key.clone()]
                .into_iter()
                .collect::<std::collections::BTreeSet<_>>()
        );
        assert_eq!(again.status, ReviewStatus::Pending);
        assert_eq!(again.feedback, "");
        assert_eq!(harness.state.db.list_documents(alice.id).await.unwrap().len(), 2);

        assert!(matches!(
            review_document(&harness.state, &hr, receipt.id, Decision::Approve).await,
            Err(ServerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_upload_keeps_approved_file() {
        let harness = harness();
        let hr = harness.hr().await;
        let (alice, _) = harness.opt_employee("alice").await;

        let receipt = submit_document(&harness.state, &alice, DocumentType::Receipt, pdf())
            .await
            .unwrap();

        // HR approves between the precheck and the store write.
        review_document(&harness.state, &hr, receipt.id, Decision::Approve)
            .await
            .unwrap();
        let replacement = Upload {
            file_name: "other.pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.7 replaced"),
        };
        let err = record_upload(
            &harness.state,
            &alice,
            DocumentType::Receipt,
            Some(receipt.document_key.clone()),
            replacement,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServerError::OutOfOrder {
                requested: DocumentType::Receipt,
                next_allowed: Some(DocumentType::Ead)
            }
        ));

        let documents = harness.state.db.list_documents(alice.id).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].status, ReviewStatus::Approved);
        assert_eq!(documents[0].document_key, receipt.document_key);
        assert_eq!(
            harness.files(alice.id),
            std::iter::once(receipt.document_key.clone()).collect::<std::collections::BTreeSet<_>>()
        );
        assert_eq!(harness.read(&receipt.document_key).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_dashboard_and_reminders() {
        let harness = harness();
        let hr = harness.hr().await;
        let (alice, _) = harness.opt_employee("alice").await;
        let (bob, _) = harness.opt_employee("bob").await;

        let receipt = submit_document(&harness.state, &alice, DocumentType::Receipt, pdf())
            .await
            .unwrap();

        let cases = pending(&harness.state).await.unwrap();
        assert_eq!(cases.len(), 2);
        let alice_case = cases.iter().find(|c| c.user_id == alice.id).unwrap();
        assert_eq!(alice_case.step.action_type, ActionType::ReviewDoc);
        assert_eq!(alice_case.work_authorization.title, "F1_CPT_OPT");

        // Nothing to remind while HR owes a review.
        assert!(matches!(
            notify(&harness.state, alice.id).await,
            Err(ServerError::InvalidState { .. })
        ));

        let reminder = notify(&harness.state, bob.id).await.unwrap();
        assert_eq!(reminder.document_type, DocumentType::Receipt);
        assert_eq!(reminder.action, ReminderAction::Upload);

        review_document(&harness.state, &hr, receipt.id, Decision::reject("expired").unwrap())
            .await
            .unwrap();
        let reminder = notify(&harness.state, alice.id).await.unwrap();
        assert_eq!(reminder.action, ReminderAction::Reupload);
        assert!(harness.mail.sent().contains(&Sent::Reminder {
            to: "alice@x.com".into(),
            name: "Ali".into(),
            document_type: DocumentType::Receipt,
            action: ReminderAction::Reupload,
        }));

        let found = all(&harness.state, Some("ALI")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(all(&harness.state, Some("zed")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_visa_case_requires_approved_opt_onboarding() {
        let harness = harness();
        let pending = harness.employee("carol").await;
        assert!(matches!(
            ensure_visa_case(&harness.state, &pending).await,
            Err(ServerError::Forbidden(_))
        ));

        let (alice, profile) = harness.opt_employee("alice").await;
        assert_eq!(ensure_visa_case(&harness.state, &alice).await.unwrap().id, profile.id);
    }
}
