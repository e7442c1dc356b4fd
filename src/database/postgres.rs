//! PostgreSQL store. Guards are evaluated inside the statement or under a
//! row lock of the same transaction as the write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::*;
use crate::error::{Result, ServerError};

/// PostgreSQL store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new [`PgStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map unique violations to a conflict naming the offending column.
fn conflict(err: sqlx::Error) -> ServerError {
    let constraint = err
        .as_database_error()
        .filter(|db| db.is_unique_violation())
        .map(|db| db.constraint().unwrap_or_default().to_owned());

    match constraint {
        Some(name) if name.contains("username") => ServerError::Conflict("username".into()),
        Some(name) if name.contains("registration_tokens") => {
            ServerError::Conflict("registration token for this email".into())
        },
        Some(name) if name.contains("email") => ServerError::Conflict("email".into()),
        Some(_) => ServerError::Conflict("record".into()),
        None => ServerError::Sql(err),
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    username: String,
    email: String,
    password: String,
    role: String,
    is_active: bool,
    onboarding_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = ServerError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password: row.password,
            role: row.role.parse()?,
            is_active: row.is_active,
            onboarding_status: row.onboarding_status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token: String,
    email: String,
    name: String,
    is_used: bool,
    expires_at: DateTime<Utc>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for RegistrationToken {
    fn from(row: TokenRow) -> Self {
        Self {
            token: row.token,
            email: row.email,
            name: row.name,
            is_used: row.is_used,
            expires_at: row.expires_at,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    house_id: Option<Uuid>,
    data: Json<EmployeeProfile>,
}

impl From<ProfileRow> for EmployeeProfile {
    fn from(row: ProfileRow) -> Self {
        // The column is the source of truth for the house reference.
        Self {
            house_id: row.house_id,
            ..row.data.0
        }
    }
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    feedback: String,
    snapshot: serde_json::Value,
    submitted_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for OnboardingApplication {
    type Error = ServerError;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            status: row.status.parse()?,
            feedback: row.feedback,
            snapshot: row.snapshot,
            submitted_at: row.submitted_at,
            reviewed_at: row.reviewed_at,
            reviewed_by: row.reviewed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    user_id: Uuid,
    document_type: String,
    document_key: String,
    status: String,
    feedback: String,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for OptDocument {
    type Error = ServerError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            document_type: row.document_type.parse()?,
            document_key: row.document_key,
            status: row.status.parse()?,
            feedback: row.feedback,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HouseRow {
    id: Uuid,
    address: Json<HouseAddress>,
    landlord: Json<Landlord>,
    facility: Json<Facility>,
    status: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HouseRow> for House {
    type Error = ServerError;

    fn try_from(row: HouseRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            address: row.address.0,
            landlord: row.landlord.0,
            facility: row.facility.0,
            status: row.status.parse()?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    house_id: Uuid,
    title: String,
    description: String,
    status: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for ReportThread {
    type Error = ServerError;

    fn try_from(row: ReportRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            house_id: row.house_id,
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    report_id: Uuid,
    message: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            report_id: row.report_id,
            message: row.message,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = ServerError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password, role, is_active, onboarding_status, created_at";
const APPLICATION_COLUMNS: &str = "id, user_id, status, feedback, snapshot, submitted_at, \
     reviewed_at, reviewed_by, created_at, updated_at";
const DOCUMENT_COLUMNS: &str =
    "id, user_id, document_type, document_key, status, feedback, reviewed_by, reviewed_at, updated_at";
const HOUSE_COLUMNS: &str = "id, address, landlord, facility, status, description, created_at";
const REPORT_COLUMNS: &str =
    "id, house_id, title, description, status, created_by, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, report_id, message, created_by, created_at, updated_at";

async fn insert_account_tx(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
    profile: Option<&EmployeeProfile>,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO users (id, username, email, password, role, is_active, onboarding_status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
    )
    .bind(account.id)
    .bind(&account.username)
    .bind(&account.email)
    .bind(&account.password)
    .bind(account.role.as_str())
    .bind(account.is_active)
    .bind(account.onboarding_status.as_str())
    .bind(account.created_at)
    .execute(&mut **tx)
    .await
    .map_err(conflict)?;

    if let Some(profile) = profile {
        upsert_profile_tx(tx, profile).await?;
    }

    Ok(())
}

async fn upsert_profile_tx(tx: &mut Transaction<'_, Postgres>, profile: &EmployeeProfile) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO employee_profiles
                (id, user_id, first_name, last_name, work_authorization_type, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                work_authorization_type = EXCLUDED.work_authorization_type,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at"#,
    )
    .bind(profile.id)
    .bind(profile.user_id)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(profile.work_authorization.kind.as_str())
    .bind(Json(profile))
    .bind(profile.created_at)
    .bind(profile.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Serialize writers of one account.
async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<Option<String>> {
    let status = sqlx::query_scalar::<_, String>(
        r#"SELECT onboarding_status FROM users WHERE id = $1 FOR UPDATE"#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(status)
}

/// Current profile, row-locked. Callers hold the account lock first.
async fn profile_for_update(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<Option<EmployeeProfile>> {
    let row = sqlx::query_as::<_, ProfileRow>(
        r#"SELECT house_id, data FROM employee_profiles WHERE user_id = $1 FOR UPDATE"#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(EmployeeProfile::from))
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, AccountRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, AccountRow>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn find_accounts(&self, ids: &[Uuid]) -> Result<Vec<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, AccountRow>(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_account(&self, account: &Account, profile: Option<&EmployeeProfile>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_account_tx(&mut tx, account, profile).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, token: &RegistrationToken) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO registration_tokens (token, email, name, is_used, expires_at, created_by, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&token.token)
        .bind(&token.email)
        .bind(&token.name)
        .bind(token.is_used)
        .bind(token.expires_at)
        .bind(token.created_by)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(conflict)?;

        Ok(())
    }

    async fn find_token(&self, token: &str) -> Result<Option<RegistrationToken>> {
        let row = sqlx::query_as::<_, TokenRow>(r#"SELECT * FROM registration_tokens WHERE token = $1"#)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RegistrationToken::from))
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM registration_tokens WHERE token = $1"#)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired_tokens(&self, email: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM registration_tokens WHERE email = $1 AND is_used = FALSE AND expires_at <= $2"#,
        )
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_tokens(&self) -> Result<Vec<RegistrationToken>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"SELECT * FROM registration_tokens ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RegistrationToken::from).collect())
    }

    async fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        account: &Account,
        profile: &EmployeeProfile,
    ) -> Result<Guarded<(), Option<RegistrationToken>>> {
        let mut tx = self.pool.begin().await?;

        // Linearization point: only one transaction flips `is_used`.
        let result = sqlx::query(
            r#"UPDATE registration_tokens SET is_used = TRUE
                WHERE token = $1 AND is_used = FALSE AND expires_at > $2"#,
        )
        .bind(token)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(Guarded::Refused(self.find_token(token).await?));
        }

        insert_account_tx(&mut tx, account, Some(profile)).await?;
        tx.commit().await?;

        Ok(Guarded::Applied(()))
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_profile(&self, id: Uuid) -> Result<Option<EmployeeProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"SELECT house_id, data FROM employee_profiles WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EmployeeProfile::from))
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<EmployeeProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"SELECT house_id, data FROM employee_profiles WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EmployeeProfile::from))
    }

    async fn list_profiles(&self) -> Result<Vec<EmployeeProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            r#"SELECT house_id, data FROM employee_profiles ORDER BY last_name, first_name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EmployeeProfile::from).collect())
    }

    async fn profiles_in_house(&self, house_id: Uuid) -> Result<Vec<EmployeeProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            r#"SELECT house_id, data FROM employee_profiles WHERE house_id = $1"#,
        )
        .bind(house_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EmployeeProfile::from).collect())
    }

    async fn modify_profile(&self, user_id: Uuid, edit: ProfileEdit) -> Result<Option<EmployeeProfile>> {
        let mut tx = self.pool.begin().await?;

        if lock_user(&mut tx, user_id).await?.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }
        let Some(mut profile) = profile_for_update(&mut tx, user_id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        edit(&mut profile);
        upsert_profile_tx(&mut tx, &profile).await?;

        tx.commit().await?;

        Ok(Some(profile))
    }

    async fn assign_house(&self, user_id: Uuid, house_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE employee_profiles SET house_id = $1 WHERE user_id = $2 AND house_id IS NULL"#,
        )
        .bind(house_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OnboardingStore for PgStore {
    async fn submit_application(
        &self,
        data: &ProfileData,
        application: &OnboardingApplication,
        allowed_from: &[OnboardingStatus],
    ) -> Result<Guarded<OnboardingApplication, OnboardingStatus>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = lock_user(&mut tx, application.user_id).await? else {
            return Err(ServerError::NotFound("account"));
        };
        let current: OnboardingStatus = current.parse()?;
        if !allowed_from.contains(&current) {
            tx.rollback().await?;
            return Ok(Guarded::Refused(current));
        }

        let now = application.submitted_at;
        let mut profile = profile_for_update(&mut tx, application.user_id)
            .await?
            .unwrap_or_else(|| EmployeeProfile::placeholder(application.user_id, now));
        profile.apply(data.clone(), now);
        upsert_profile_tx(&mut tx, &profile).await?;

        let query = format!(
            r#"INSERT INTO onboarding_applications
                    (id, user_id, status, feedback, snapshot, submitted_at, reviewed_at, reviewed_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (user_id) DO UPDATE SET
                    status = EXCLUDED.status,
                    feedback = EXCLUDED.feedback,
                    snapshot = EXCLUDED.snapshot,
                    submitted_at = EXCLUDED.submitted_at,
                    reviewed_at = EXCLUDED.reviewed_at,
                    reviewed_by = EXCLUDED.reviewed_by,
                    updated_at = EXCLUDED.updated_at
                RETURNING {APPLICATION_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(application.id)
            .bind(application.user_id)
            .bind(application.status.as_str())
            .bind(&application.feedback)
            .bind(&application.snapshot)
            .bind(application.submitted_at)
            .bind(application.reviewed_at)
            .bind(application.reviewed_by)
            .bind(application.created_at)
            .bind(application.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(r#"UPDATE users SET onboarding_status = $1 WHERE id = $2"#)
            .bind(OnboardingStatus::Pending.as_str())
            .bind(application.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Guarded::Applied(row.try_into()?))
    }

    async fn find_application(&self, id: Uuid) -> Result<Option<OnboardingApplication>> {
        let query = format!("SELECT {APPLICATION_COLUMNS} FROM onboarding_applications WHERE id = $1");
        sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OnboardingApplication::try_from)
            .transpose()
    }

    async fn find_application_by_user(&self, user_id: Uuid) -> Result<Option<OnboardingApplication>> {
        let query =
            format!("SELECT {APPLICATION_COLUMNS} FROM onboarding_applications WHERE user_id = $1");
        sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(OnboardingApplication::try_from)
            .transpose()
    }

    async fn list_applications(&self, status: Option<ReviewStatus>) -> Result<Vec<OnboardingApplication>> {
        let query = format!(
            "SELECT {APPLICATION_COLUMNS} FROM onboarding_applications
                WHERE $1::TEXT IS NULL OR status = $1
                ORDER BY updated_at DESC"
        );
        let rows = sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn review_application(
        &self,
        transition: &Transition,
    ) -> Result<Guarded<OnboardingApplication, Option<ReviewStatus>>> {
        let mut tx = self.pool.begin().await?;

        // Same lock order as submissions: account first, then application.
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT user_id FROM onboarding_applications WHERE id = $1"#,
        )
        .bind(transition.id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return Ok(Guarded::Refused(None));
        };
        lock_user(&mut tx, user_id).await?;

        // The status guard is part of the write itself.
        let query = format!(
            r#"UPDATE onboarding_applications
                SET status = $1, feedback = $2, reviewed_by = $3, reviewed_at = $4, updated_at = $4
                WHERE id = $5 AND status = 'PENDING'
                RETURNING {APPLICATION_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(transition.to.as_str())
            .bind(&transition.feedback)
            .bind(transition.reviewed_by)
            .bind(transition.reviewed_at)
            .bind(transition.id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            let current = self.find_application(transition.id).await?;
            return Ok(Guarded::Refused(current.map(|a| a.status)));
        };
        let application = OnboardingApplication::try_from(row)?;

        sqlx::query(r#"UPDATE users SET onboarding_status = $1 WHERE id = $2"#)
            .bind(OnboardingStatus::from(transition.to).as_str())
            .bind(application.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Guarded::Applied(application))
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<OptDocument>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM opt_documents WHERE user_id = $1");
        let rows = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        let mut documents: Vec<OptDocument> = collect(rows)?;
        documents.sort_by_key(|d| d.document_type);
        Ok(documents)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<OptDocument>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM opt_documents WHERE id = $1");
        sqlx::query_as::<_, DocumentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OptDocument::try_from)
            .transpose()
    }

    async fn submit_document(
        &self,
        user_id: Uuid,
        document_type: DocumentType,
        document_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Guarded<OptDocument, Option<DocumentType>>> {
        let mut tx = self.pool.begin().await?;

        if lock_user(&mut tx, user_id).await?.is_none() {
            return Err(ServerError::NotFound("account"));
        }

        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM opt_documents WHERE user_id = $1");
        let rows = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?;
        let documents: Vec<OptDocument> = collect(rows)?;

        let next = DocumentType::next_allowed(&documents);
        if next != Some(document_type) {
            tx.rollback().await?;
            return Ok(Guarded::Refused(next));
        }

        let query = format!(
            r#"INSERT INTO opt_documents (id, user_id, document_type, document_key, status, feedback, updated_at)
                VALUES ($1, $2, $3, $4, 'PENDING', '', $5)
                ON CONFLICT (user_id, document_type) DO UPDATE SET
                    document_key = EXCLUDED.document_key,
                    status = 'PENDING',
                    feedback = '',
                    reviewed_by = NULL,
                    reviewed_at = NULL,
                    updated_at = EXCLUDED.updated_at
                RETURNING {DOCUMENT_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(document_type.as_str())
            .bind(document_key)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Guarded::Applied(row.try_into()?))
    }

    async fn review_document(&self, transition: &Transition) -> Result<Guarded<OptDocument, Option<ReviewStatus>>> {
        let query = format!(
            r#"UPDATE opt_documents
                SET status = $1, feedback = $2, reviewed_by = $3, reviewed_at = $4, updated_at = $4
                WHERE id = $5 AND status = 'PENDING'
                RETURNING {DOCUMENT_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(transition.to.as_str())
            .bind(&transition.feedback)
            .bind(transition.reviewed_by)
            .bind(transition.reviewed_at)
            .bind(transition.id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Guarded::Applied(row.try_into()?)),
            None => {
                let current = self.find_document(transition.id).await?;
                Ok(Guarded::Refused(current.map(|d| d.status)))
            },
        }
    }
}

#[async_trait]
impl HouseStore for PgStore {
    async fn insert_house(&self, house: &House) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO houses (id, address, landlord, facility, status, description, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(house.id)
        .bind(Json(&house.address))
        .bind(Json(&house.landlord))
        .bind(Json(&house.facility))
        .bind(house.status.as_str())
        .bind(&house.description)
        .bind(house.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_house(&self, id: Uuid) -> Result<Option<House>> {
        let query = format!("SELECT {HOUSE_COLUMNS} FROM houses WHERE id = $1");
        sqlx::query_as::<_, HouseRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(House::try_from)
            .transpose()
    }

    async fn list_houses(&self) -> Result<Vec<House>> {
        let query = format!("SELECT {HOUSE_COLUMNS} FROM houses ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, HouseRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn count_houses(&self, status: HouseStatus) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM houses WHERE status = $1"#)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn nth_house(&self, status: HouseStatus, offset: u64) -> Result<Option<House>> {
        let query = format!(
            "SELECT {HOUSE_COLUMNS} FROM houses WHERE status = $1 ORDER BY created_at, id OFFSET $2 LIMIT 1"
        );
        sqlx::query_as::<_, HouseRow>(&query)
            .bind(status.as_str())
            .bind(offset as i64)
            .fetch_optional(&self.pool)
            .await?
            .map(House::try_from)
            .transpose()
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn insert_report(&self, report: &ReportThread) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO report_threads (id, house_id, title, description, status, created_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(report.id)
        .bind(report.house_id)
        .bind(&report.title)
        .bind(&report.description)
        .bind(report.status.as_str())
        .bind(report.created_by)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_report(&self, id: Uuid) -> Result<Option<ReportThread>> {
        let query = format!("SELECT {REPORT_COLUMNS} FROM report_threads WHERE id = $1");
        sqlx::query_as::<_, ReportRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ReportThread::try_from)
            .transpose()
    }

    async fn list_reports(
        &self,
        house_id: Uuid,
        created_by: Option<Uuid>,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ReportThread>> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM report_threads
                WHERE house_id = $1 AND ($2::UUID IS NULL OR created_by = $2)"#,
        )
        .bind(house_id)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        let query = format!(
            "SELECT {REPORT_COLUMNS} FROM report_threads
                WHERE house_id = $1 AND ($2::UUID IS NULL OR created_by = $2)
                ORDER BY created_at DESC
                OFFSET $3 LIMIT $4"
        );
        let rows = sqlx::query_as::<_, ReportRow>(&query)
            .bind(house_id)
            .bind(created_by)
            .bind(i64::from(page.saturating_sub(1)) * i64::from(per_page))
            .bind(i64::from(per_page))
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: collect(rows)?,
            total: total.max(0) as u64,
        })
    }

    async fn update_report_status(
        &self,
        id: Uuid,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ReportThread>> {
        let query = format!(
            "UPDATE report_threads SET status = $1, updated_at = $2 WHERE id = $3 RETURNING {REPORT_COLUMNS}"
        );
        sqlx::query_as::<_, ReportRow>(&query)
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ReportThread::try_from)
            .transpose()
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO report_comments (id, report_id, message, created_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(comment.id)
        .bind(comment.report_id)
        .bind(&comment.message)
        .bind(comment.created_by)
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let query = format!("SELECT {COMMENT_COLUMNS} FROM report_comments WHERE id = $1");
        let row = sqlx::query_as::<_, CommentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Comment::from))
    }

    async fn list_comments(&self, report_id: Uuid) -> Result<Vec<Comment>> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM report_comments WHERE report_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, CommentRow>(&query)
            .bind(report_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn update_comment(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<Option<Comment>> {
        let query = format!(
            "UPDATE report_comments SET message = $1, updated_at = $2 WHERE id = $3 RETURNING {COMMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CommentRow>(&query)
            .bind(message)
            .bind(now)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Comment::from))
    }
}
