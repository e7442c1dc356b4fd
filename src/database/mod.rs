//! Persistence ports and their PostgreSQL and in-memory adapters.
mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRef;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::AppState;
use crate::error::Result;
use crate::model::*;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "hiregate";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Outcome of a conditional write. `Refused` carries what the guard saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T, S> {
    Applied(T),
    Refused(S),
}

/// Review stamp applied to a pending record.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub id: Uuid,
    pub to: ReviewStatus,
    pub feedback: String,
    pub reviewed_by: Uuid,
    pub reviewed_at: DateTime<Utc>,
}

/// In-place profile change, see [`ProfileStore::modify_profile`].
pub type ProfileEdit = Box<dyn FnOnce(&mut EmployeeProfile) + Send>;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>>;

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn find_accounts(&self, ids: &[Uuid]) -> Result<Vec<Account>>;

    /// Insert an account with its optional profile. Duplicate username or
    /// email is a conflict.
    async fn insert_account(&self, account: &Account, profile: Option<&EmployeeProfile>) -> Result<()>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Conflict when a token already exists for the email.
    async fn insert_token(&self, token: &RegistrationToken) -> Result<()>;

    async fn find_token(&self, token: &str) -> Result<Option<RegistrationToken>>;

    async fn delete_token(&self, token: &str) -> Result<()>;

    /// Drop expired, never used tokens of `email`.
    async fn purge_expired_tokens(&self, email: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Newest first.
    async fn list_tokens(&self) -> Result<Vec<RegistrationToken>>;

    /// Mark the token used and create the account and its profile as one
    /// unit. Refused with the stored token (if any) when it is unknown,
    /// used or expired.
    async fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        account: &Account,
        profile: &EmployeeProfile,
    ) -> Result<Guarded<(), Option<RegistrationToken>>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, id: Uuid) -> Result<Option<EmployeeProfile>>;

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<EmployeeProfile>>;

    async fn list_profiles(&self) -> Result<Vec<EmployeeProfile>>;

    async fn profiles_in_house(&self, house_id: Uuid) -> Result<Vec<EmployeeProfile>>;

    /// Run `edit` on the current profile while holding the account's write
    /// lock, then store it. The house reference is left untouched. `None`
    /// when the account has no profile.
    async fn modify_profile(&self, user_id: Uuid, edit: ProfileEdit) -> Result<Option<EmployeeProfile>>;

    /// Set the house only if none is assigned yet.
    async fn assign_house(&self, user_id: Uuid, house_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait OnboardingStore: Send + Sync {
    /// Store a submission when the account status is one of `allowed_from`:
    /// `data` is applied to the current profile, and the application (one
    /// per account) and the account status move to PENDING together.
    /// Refused with the current status.
    async fn submit_application(
        &self,
        data: &ProfileData,
        application: &OnboardingApplication,
        allowed_from: &[OnboardingStatus],
    ) -> Result<Guarded<OnboardingApplication, OnboardingStatus>>;

    async fn find_application(&self, id: Uuid) -> Result<Option<OnboardingApplication>>;

    async fn find_application_by_user(&self, user_id: Uuid) -> Result<Option<OnboardingApplication>>;

    /// Most recently updated first.
    async fn list_applications(&self, status: Option<ReviewStatus>) -> Result<Vec<OnboardingApplication>>;

    /// Apply a review to a PENDING application and mirror the result on the
    /// account. Refused with the current status, `None` if it vanished.
    async fn review_application(
        &self,
        transition: &Transition,
    ) -> Result<Guarded<OnboardingApplication, Option<ReviewStatus>>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of an account, in sequence order.
    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<OptDocument>>;

    async fn find_document(&self, id: Uuid) -> Result<Option<OptDocument>>;

    /// Upsert the (account, type) row as PENDING when `document_type` is the
    /// next allowed type, checked under a per-account lock. Refused with the
    /// next allowed type otherwise.
    async fn submit_document(
        &self,
        user_id: Uuid,
        document_type: DocumentType,
        document_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Guarded<OptDocument, Option<DocumentType>>>;

    /// Apply a review to a PENDING document.
    async fn review_document(&self, transition: &Transition) -> Result<Guarded<OptDocument, Option<ReviewStatus>>>;
}

#[async_trait]
pub trait HouseStore: Send + Sync {
    async fn insert_house(&self, house: &House) -> Result<()>;

    async fn find_house(&self, id: Uuid) -> Result<Option<House>>;

    /// Oldest first.
    async fn list_houses(&self) -> Result<Vec<House>>;

    async fn count_houses(&self, status: HouseStatus) -> Result<u64>;

    /// House at `offset` among those with `status`, oldest first.
    async fn nth_house(&self, status: HouseStatus, offset: u64) -> Result<Option<House>>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, report: &ReportThread) -> Result<()>;

    async fn find_report(&self, id: Uuid) -> Result<Option<ReportThread>>;

    /// Newest first, optionally restricted to one author.
    async fn list_reports(
        &self,
        house_id: Uuid,
        created_by: Option<Uuid>,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ReportThread>>;

    async fn update_report_status(
        &self,
        id: Uuid,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ReportThread>>;

    async fn insert_comment(&self, comment: &Comment) -> Result<()>;

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>>;

    /// Oldest first.
    async fn list_comments(&self, report_id: Uuid) -> Result<Vec<Comment>>;

    async fn update_comment(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<Option<Comment>>;
}

/// Every store the service needs.
pub trait Store:
    AccountStore + TokenStore + ProfileStore + OnboardingStore + DocumentStore + HouseStore + ReportStore
{
}

impl<T> Store for T where
    T: AccountStore + TokenStore + ProfileStore + OnboardingStore + DocumentStore + HouseStore + ReportStore
{
}

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn Store>,
}

impl Database {
    /// Init PostgreSQL connections and run migrations.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let postgres = PgPoolOptions::new().max_connections(pool).connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        sqlx::migrate!().run(&postgres).await?;

        Ok(Self::from_store(PgStore::new(postgres)))
    }

    /// Volatile store, lost on restart.
    pub fn memory() -> Self {
        Self::from_store(MemoryStore::default())
    }

    pub fn from_store(store: impl Store + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl Deref for Database {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
