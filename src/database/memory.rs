//! Volatile store. A single lock serializes writers, which makes every
//! conditional write atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::*;
use crate::error::{Result, ServerError};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    tokens: HashMap<String, RegistrationToken>,
    profiles: HashMap<Uuid, EmployeeProfile>,
    applications: HashMap<Uuid, OnboardingApplication>,
    documents: HashMap<(Uuid, DocumentType), OptDocument>,
    houses: Vec<House>,
    reports: Vec<ReportThread>,
    comments: Vec<Comment>,
}

impl Tables {
    fn check_account_unique(&self, account: &Account) -> Result<()> {
        for existing in self.accounts.values() {
            if existing.username == account.username {
                return Err(ServerError::Conflict("username".into()));
            }
            if existing.email == account.email {
                return Err(ServerError::Conflict("email".into()));
            }
        }
        Ok(())
    }

    fn insert_account(&mut self, account: &Account, profile: Option<&EmployeeProfile>) -> Result<()> {
        self.check_account_unique(account)?;
        self.accounts.insert(account.id, account.clone());
        if let Some(profile) = profile {
            self.profiles.insert(profile.user_id, profile.clone());
        }
        Ok(())
    }

    fn documents_of(&self, user_id: Uuid) -> Vec<OptDocument> {
        DocumentType::ALL
            .iter()
            .filter_map(|kind| self.documents.get(&(user_id, *kind)).cloned())
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.username == username).cloned())
    }

    async fn find_accounts(&self, ids: &[Uuid]) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.accounts.get(id).cloned()).collect())
    }

    async fn insert_account(&self, account: &Account, profile: Option<&EmployeeProfile>) -> Result<()> {
        self.tables.write().await.insert_account(account, profile)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: &RegistrationToken) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.tokens.values().any(|t| t.email == token.email) || tables.tokens.contains_key(&token.token) {
            return Err(ServerError::Conflict("registration token for this email".into()));
        }
        tables.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, token: &str) -> Result<Option<RegistrationToken>> {
        Ok(self.tables.read().await.tokens.get(token).cloned())
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        self.tables.write().await.tokens.remove(token);
        Ok(())
    }

    async fn purge_expired_tokens(&self, email: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|_, t| !(t.email == email && !t.is_used && t.expires_at <= now));
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn list_tokens(&self) -> Result<Vec<RegistrationToken>> {
        let mut tokens: Vec<_> = self.tables.read().await.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        account: &Account,
        profile: &EmployeeProfile,
    ) -> Result<Guarded<(), Option<RegistrationToken>>> {
        let mut tables = self.tables.write().await;
        let usable = matches!(
            tables.tokens.get(token),
            Some(t) if !t.is_used && t.expires_at > now
        );
        if !usable {
            return Ok(Guarded::Refused(tables.tokens.get(token).cloned()));
        }

        tables.insert_account(account, Some(profile))?;
        if let Some(t) = tables.tokens.get_mut(token) {
            t.is_used = true;
        }
        Ok(Guarded::Applied(()))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, id: Uuid) -> Result<Option<EmployeeProfile>> {
        let tables = self.tables.read().await;
        Ok(tables.profiles.values().find(|p| p.id == id).cloned())
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<EmployeeProfile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<EmployeeProfile>> {
        Ok(self.tables.read().await.profiles.values().cloned().collect())
    }

    async fn profiles_in_house(&self, house_id: Uuid) -> Result<Vec<EmployeeProfile>> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .filter(|p| p.house_id == Some(house_id))
            .cloned()
            .collect())
    }

    async fn modify_profile(&self, user_id: Uuid, edit: ProfileEdit) -> Result<Option<EmployeeProfile>> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.profiles.get_mut(&user_id) else {
            return Ok(None);
        };
        let house_id = stored.house_id;
        edit(stored);
        stored.house_id = house_id;
        Ok(Some(stored.clone()))
    }

    async fn assign_house(&self, user_id: Uuid, house_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.profiles.get_mut(&user_id) {
            Some(profile) if profile.house_id.is_none() => {
                profile.house_id = Some(house_id);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OnboardingStore for MemoryStore {
    async fn submit_application(
        &self,
        data: &ProfileData,
        application: &OnboardingApplication,
        allowed_from: &[OnboardingStatus],
    ) -> Result<Guarded<OnboardingApplication, OnboardingStatus>> {
        let mut tables = self.tables.write().await;
        let Some(account) = tables.accounts.get_mut(&application.user_id) else {
            return Err(ServerError::NotFound("account"));
        };
        if !allowed_from.contains(&account.onboarding_status) {
            return Ok(Guarded::Refused(account.onboarding_status));
        }
        account.onboarding_status = OnboardingStatus::Pending;

        let now = application.submitted_at;
        tables
            .profiles
            .entry(application.user_id)
            .or_insert_with(|| EmployeeProfile::placeholder(application.user_id, now))
            .apply(data.clone(), now);

        let stored = match tables
            .applications
            .values()
            .find(|a| a.user_id == application.user_id)
        {
            Some(existing) => OnboardingApplication {
                id: existing.id,
                created_at: existing.created_at,
                ..application.clone()
            },
            None => application.clone(),
        };
        tables.applications.insert(stored.id, stored.clone());

        Ok(Guarded::Applied(stored))
    }

    async fn find_application(&self, id: Uuid) -> Result<Option<OnboardingApplication>> {
        Ok(self.tables.read().await.applications.get(&id).cloned())
    }

    async fn find_application_by_user(&self, user_id: Uuid) -> Result<Option<OnboardingApplication>> {
        let tables = self.tables.read().await;
        Ok(tables.applications.values().find(|a| a.user_id == user_id).cloned())
    }

    async fn list_applications(&self, status: Option<ReviewStatus>) -> Result<Vec<OnboardingApplication>> {
        let tables = self.tables.read().await;
        let mut applications: Vec<_> = tables
            .applications
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        applications.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(applications)
    }

    async fn review_application(
        &self,
        transition: &Transition,
    ) -> Result<Guarded<OnboardingApplication, Option<ReviewStatus>>> {
        let mut tables = self.tables.write().await;
        let Some(application) = tables.applications.get_mut(&transition.id) else {
            return Ok(Guarded::Refused(None));
        };
        if application.status != ReviewStatus::Pending {
            return Ok(Guarded::Refused(Some(application.status)));
        }

        application.status = transition.to;
        application.feedback = transition.feedback.clone();
        application.reviewed_by = Some(transition.reviewed_by);
        application.reviewed_at = Some(transition.reviewed_at);
        application.updated_at = transition.reviewed_at;
        let application = application.clone();

        if let Some(account) = tables.accounts.get_mut(&application.user_id) {
            account.onboarding_status = transition.to.into();
        }

        Ok(Guarded::Applied(application))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<OptDocument>> {
        Ok(self.tables.read().await.documents_of(user_id))
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<OptDocument>> {
        let tables = self.tables.read().await;
        Ok(tables.documents.values().find(|d| d.id == id).cloned())
    }

    async fn submit_document(
        &self,
        user_id: Uuid,
        document_type: DocumentType,
        document_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Guarded<OptDocument, Option<DocumentType>>> {
        let mut tables = self.tables.write().await;
        let next = DocumentType::next_allowed(&tables.documents_of(user_id));
        if next != Some(document_type) {
            return Ok(Guarded::Refused(next));
        }

        let document = tables
            .documents
            .entry((user_id, document_type))
            .and_modify(|doc| doc.resubmit(document_key, now))
            .or_insert_with(|| OptDocument::pending(user_id, document_type, document_key, now));
        Ok(Guarded::Applied(document.clone()))
    }

    async fn review_document(&self, transition: &Transition) -> Result<Guarded<OptDocument, Option<ReviewStatus>>> {
        let mut tables = self.tables.write().await;
        let Some(document) = tables.documents.values_mut().find(|d| d.id == transition.id) else {
            return Ok(Guarded::Refused(None));
        };
        if document.status != ReviewStatus::Pending {
            return Ok(Guarded::Refused(Some(document.status)));
        }

        document.status = transition.to;
        document.feedback = transition.feedback.clone();
        document.reviewed_by = Some(transition.reviewed_by);
        document.reviewed_at = Some(transition.reviewed_at);
        document.updated_at = transition.reviewed_at;
        Ok(Guarded::Applied(document.clone()))
    }
}

#[async_trait]
impl HouseStore for MemoryStore {
    async fn insert_house(&self, house: &House) -> Result<()> {
        self.tables.write().await.houses.push(house.clone());
        Ok(())
    }

    async fn find_house(&self, id: Uuid) -> Result<Option<House>> {
        let tables = self.tables.read().await;
        Ok(tables.houses.iter().find(|h| h.id == id).cloned())
    }

    async fn list_houses(&self) -> Result<Vec<House>> {
        Ok(self.tables.read().await.houses.clone())
    }

    async fn count_houses(&self, status: HouseStatus) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.houses.iter().filter(|h| h.status == status).count() as u64)
    }

    async fn nth_house(&self, status: HouseStatus, offset: u64) -> Result<Option<House>> {
        let tables = self.tables.read().await;
        Ok(tables
            .houses
            .iter()
            .filter(|h| h.status == status)
            .nth(offset as usize)
            .cloned())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_report(&self, report: &ReportThread) -> Result<()> {
        self.tables.write().await.reports.push(report.clone());
        Ok(())
    }

    async fn find_report(&self, id: Uuid) -> Result<Option<ReportThread>> {
        let tables = self.tables.read().await;
        Ok(tables.reports.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reports(
        &self,
        house_id: Uuid,
        created_by: Option<Uuid>,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ReportThread>> {
        let tables = self.tables.read().await;
        let mut reports: Vec<_> = tables
            .reports
            .iter()
            .filter(|r| r.house_id == house_id && created_by.is_none_or(|id| r.created_by == id))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = reports.len() as u64;
        let skip = u64::from(page.saturating_sub(1)) * u64::from(per_page);
        let items = reports
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(per_page as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn update_report_status(
        &self,
        id: Uuid,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ReportThread>> {
        let mut tables = self.tables.write().await;
        Ok(tables.reports.iter_mut().find(|r| r.id == id).map(|report| {
            report.status = status;
            report.updated_at = now;
            report.clone()
        }))
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.tables.write().await.comments.push(comment.clone());
        Ok(())
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let tables = self.tables.read().await;
        Ok(tables.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn list_comments(&self, report_id: Uuid) -> Result<Vec<Comment>> {
        let tables = self.tables.read().await;
        let mut comments: Vec<_> = tables
            .comments
            .iter()
            .filter(|c| c.report_id == report_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn update_comment(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<Option<Comment>> {
        let mut tables = self.tables.write().await;
        Ok(tables.comments.iter_mut().find(|c| c.id == id).map(|comment| {
            comment.message = message.to_owned();
            comment.updated_at = now;
            comment.clone()
        }))
    }
}
