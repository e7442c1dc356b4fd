//! Guarded HR review shared by onboarding applications and OPT documents.
//!
//! A review only applies to a PENDING record. The guard is checked twice:
//! once on the loaded record to report a precise error, and again by the
//! store as part of the write, so two concurrent reviewers can never both
//! transition the same record.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AppState;
use crate::database::{DocumentStore, Guarded, OnboardingStore, Store, Transition};
use crate::error::{Result, ServerError};
use crate::model::{Account, OnboardingApplication, OptDocument, ReviewStatus};

/// HR verdict on a pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { feedback: String },
}

impl Decision {
    /// Build a decision from an `approve`/`reject` action.
    pub fn parse(action: &str, feedback: Option<&str>) -> Result<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Decision::Approve),
            "reject" => Decision::reject(feedback.unwrap_or_default()),
            _ => Err(ServerError::field(
                "action",
                "action",
                "Action must be either approve or reject.",
            )),
        }
    }

    /// Rejections must explain themselves.
    pub fn reject(feedback: &str) -> Result<Self> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(ServerError::field(
                "feedback",
                "required",
                "Feedback is required when rejecting.",
            ));
        }

        Ok(Decision::Reject {
            feedback: feedback.to_owned(),
        })
    }

    pub fn target(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject { .. } => ReviewStatus::Rejected,
        }
    }

    /// Approvals clear any previous feedback.
    pub fn feedback(&self) -> &str {
        match self {
            Decision::Approve => "",
            Decision::Reject { feedback } => feedback,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject { .. } => "reject",
        }
    }
}

/// Record carrying a review status and audit stamp.
#[async_trait]
pub trait Reviewable: Sized + Send + Sync {
    /// Entity name used in errors and logs.
    const KIND: &'static str;

    fn status(&self) -> ReviewStatus;

    async fn load(store: &dyn Store, id: Uuid) -> Result<Option<Self>>;

    /// Conditional write, refused unless the record is still PENDING.
    async fn commit(store: &dyn Store, transition: &Transition) -> Result<Guarded<Self, Option<ReviewStatus>>>;
}

#[async_trait]
impl Reviewable for OnboardingApplication {
    const KIND: &'static str = "onboarding application";

    fn status(&self) -> ReviewStatus {
        self.status
    }

    async fn load(store: &dyn Store, id: Uuid) -> Result<Option<Self>> {
        store.find_application(id).await
    }

    async fn commit(store: &dyn Store, transition: &Transition) -> Result<Guarded<Self, Option<ReviewStatus>>> {
        // Also mirrors the status onto the account, atomically.
        store.review_application(transition).await
    }
}

#[async_trait]
impl Reviewable for OptDocument {
    const KIND: &'static str = "document";

    fn status(&self) -> ReviewStatus {
        self.status
    }

    async fn load(store: &dyn Store, id: Uuid) -> Result<Option<Self>> {
        store.find_document(id).await
    }

    async fn commit(store: &dyn Store, transition: &Transition) -> Result<Guarded<Self, Option<ReviewStatus>>> {
        store.review_document(transition).await
    }
}

fn not_pending(kind: &'static str, current: ReviewStatus, decision: &Decision) -> ServerError {
    ServerError::InvalidState {
        entity: kind,
        current: current.to_string(),
        action: decision.action(),
    }
}

/// Single entry point for every review transition.
pub struct ReviewCoordinator;

impl ReviewCoordinator {
    pub async fn review<T: Reviewable>(
        state: &AppState,
        id: Uuid,
        reviewer: &Account,
        decision: Decision,
    ) -> Result<T> {
        if !reviewer.is_hr() {
            return Err(ServerError::Forbidden("only HR can review"));
        }

        let current = T::load(&*state.db, id)
            .await?
            .ok_or(ServerError::NotFound(T::KIND))?;
        if current.status() != ReviewStatus::Pending {
            return Err(not_pending(T::KIND, current.status(), &decision));
        }

        let transition = Transition {
            id,
            to: decision.target(),
            feedback: decision.feedback().to_owned(),
            reviewed_by: reviewer.id,
            reviewed_at: state.clock.now(),
        };

        match T::commit(&*state.db, &transition).await? {
            Guarded::Applied(reviewed) => {
                tracing::info!(
                    kind = T::KIND,
                    %id,
                    reviewer = %reviewer.id,
                    status = %transition.to,
                    "review applied"
                );
                metrics::counter!(
                    "reviews_total",
                    "kind" => T::KIND,
                    "decision" => decision.action()
                )
                .increment(1);

                Ok(reviewed)
            },
            Guarded::Refused(Some(status)) => {
                tracing::warn!(kind = T::KIND, %id, %status, "concurrent review won the race");
                Err(not_pending(T::KIND, status, &decision))
            },
            Guarded::Refused(None) => Err(ServerError::NotFound(T::KIND)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ProfileStore;
    use crate::router::tests::harness;

    #[test]
    fn test_reject_requires_feedback() {
        assert!(matches!(Decision::reject("   "), Err(ServerError::Validation(_))));
        assert!(matches!(
            Decision::parse("reject", None),
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            Decision::parse("archive", Some("x")),
            Err(ServerError::Validation(_))
        ));

        let decision = Decision::parse("Reject", Some("  fix X ")).unwrap();
        assert_eq!(decision.feedback(), "fix X");
        assert_eq!(decision.target(), ReviewStatus::Rejected);
        assert_eq!(Decision::Approve.feedback(), "");
    }

    #[tokio::test]
    async fn test_only_hr_can_review() {
        let harness = harness();
        let employee = harness.employee("alice").await;
        let application = harness.submitted_application(&employee).await;

        let err = ReviewCoordinator::review::<OnboardingApplication>(
            &harness.state,
            application.id,
            &employee,
            Decision::Approve,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let harness = harness();
        let hr = harness.hr().await;

        let err = ReviewCoordinator::review::<OptDocument>(&harness.state, Uuid::new_v4(), &hr, Decision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound("document")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reviews_apply_once() {
        let harness = harness();
        let hr = harness.hr().await;
        let employee = harness.employee("alice").await;
        let application = harness.submitted_application(&employee).await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let state = harness.state.clone();
                let hr = hr.clone();
                let decision = if i % 2 == 0 {
                    Decision::Approve
                } else {
                    Decision::reject("incomplete").unwrap()
                };
                tokio::spawn(async move {
                    ReviewCoordinator::review::<OnboardingApplication>(&state, application.id, &hr, decision)
                        .await
                })
            })
            .collect();

        let mut applied = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(reviewed) => applied.push(reviewed),
                Err(err) => assert!(matches!(err, ServerError::InvalidState { .. })),
            }
        }
        assert_eq!(applied.len(), 1);

        // The account mirrors whichever transition won.
        let account = harness.account(employee.id).await;
        assert_eq!(
            account.onboarding_status,
            crate::model::OnboardingStatus::from(applied[0].status)
        );
        assert!(harness.state.db.find_profile_by_user(employee.id).await.unwrap().is_some());
    }
}
