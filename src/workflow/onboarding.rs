//! Onboarding submission and its HR review.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::AppState;
use crate::database::{AccountStore, Guarded, OnboardingStore, ProfileStore};
use crate::error::{Result, ServerError};
use crate::model::{
    Account, Address, CarInformation, Contact, DriverLicense, EmployeeProfile, Gender,
    OnboardingApplication, OnboardingStatus, ProfileData, ReviewStatus, WorkAuthorization,
    WorkAuthorizationType, utc_midnight,
};

use super::housing::AddressForm;
use super::review::{Decision, ReviewCoordinator};
use super::uploads;

static SSN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").ok());
static ZIP: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").ok());
static PHONE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}$").ok());

const DATE_FORMAT: &str = "%Y-%m-%d";

fn matches(regex: &LazyLock<Option<Regex>>, value: &str) -> bool {
    regex.as_ref().is_some_and(|re| re.is_match(value))
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

pub fn validate_ssn(value: &str) -> std::result::Result<(), ValidationError> {
    if matches(&SSN, value) {
        Ok(())
    } else {
        Err(invalid("ssn", "SSN must be formatted as NNN-NN-NNNN."))
    }
}

pub fn validate_zip(value: &str) -> std::result::Result<(), ValidationError> {
    if matches(&ZIP, value) {
        Ok(())
    } else {
        Err(invalid("zip", "ZIP code must have 5 digits."))
    }
}

/// Ten digits, optionally grouped as `(555) 123-4567`.
pub fn validate_phone(value: &str) -> std::result::Result<(), ValidationError> {
    if matches(&PHONE, value) {
        Ok(())
    } else {
        Err(invalid("phone", "Phone number must have 10 digits."))
    }
}

pub fn validate_date(value: &str) -> std::result::Result<(), ValidationError> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| invalid("date", "Date must be formatted as YYYY-MM-DD."))
}

pub fn validate_gender(value: &str) -> std::result::Result<(), ValidationError> {
    value
        .parse::<Gender>()
        .map(|_| ())
        .map_err(|_| invalid("gender", "Gender must be MALE, FEMALE or NO_ANSWER."))
}

pub fn validate_work_authorization(value: &str) -> std::result::Result<(), ValidationError> {
    value
        .parse::<WorkAuthorizationType>()
        .map(|_| ())
        .map_err(|_| invalid("work_authorization", "Unknown work authorization type."))
}

/// Strict `YYYY-MM-DD`, to UTC midnight.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok().map(utc_midnight)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    #[validate(length(min = 1, message = "First name is required."))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required."))]
    pub last_name: String,
    pub middle_name: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    #[validate(length(min = 1, message = "Relationship is required."))]
    pub relationship: String,
}

impl From<ContactForm> for Contact {
    fn from(form: ContactForm) -> Self {
        Self {
            first_name: form.first_name.trim().to_owned(),
            last_name: form.last_name.trim().to_owned(),
            middle_name: non_blank(form.middle_name),
            phone: form.phone,
            email: non_blank(form.email),
            relationship: form.relationship,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CarForm {
    #[validate(length(min = 1, message = "Car make is required."))]
    pub make: String,
    #[validate(length(min = 1, message = "Car model is required."))]
    pub model: String,
    #[validate(length(min = 1, message = "Car color is required."))]
    pub color: String,
}

impl From<CarForm> for CarInformation {
    fn from(form: CarForm) -> Self {
        Self {
            make: form.make,
            model: form.model,
            color: form.color,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DriverLicenseForm {
    #[validate(length(min = 1, message = "License number is required."))]
    pub number: String,
    #[validate(custom(function = "validate_date"))]
    pub expiration_date: String,
}

impl From<AddressForm> for Address {
    fn from(form: AddressForm) -> Self {
        Self {
            building_apt: non_blank(form.unit),
            street: form.street,
            city: form.city,
            state: form.state,
            zip: form.zip,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Onboarding payload. Kept verbatim as the application snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingForm {
    #[validate(length(min = 1, max = 50, message = "First name is required."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50, message = "Last name is required."))]
    pub last_name: String,
    pub middle_name: Option<String>,
    pub preferred_name: Option<String>,
    pub profile_picture_key: Option<String>,
    #[validate(nested)]
    pub address: AddressForm,
    #[validate(custom(function = "validate_phone"))]
    pub cell_phone: String,
    #[validate(custom(function = "validate_phone"))]
    pub work_phone: Option<String>,
    #[validate(nested)]
    pub car_information: Option<CarForm>,
    #[validate(custom(function = "validate_ssn"))]
    pub ssn: String,
    #[validate(custom(function = "validate_date"))]
    pub date_of_birth: String,
    #[validate(custom(function = "validate_gender"))]
    pub gender: String,
    #[validate(custom(function = "validate_work_authorization"))]
    pub work_authorization_type: String,
    pub work_authorization_title: Option<String>,
    #[validate(custom(function = "validate_date"))]
    pub work_authorization_start: Option<String>,
    #[validate(custom(function = "validate_date"))]
    pub work_authorization_end: Option<String>,
    #[validate(nested)]
    pub driver_license: Option<DriverLicenseForm>,
    pub driver_license_key: Option<String>,
    #[validate(nested)]
    pub reference: Option<ContactForm>,
    #[validate(
        length(min = 1, message = "At least one emergency contact is required."),
        nested
    )]
    pub emergency_contacts: Vec<ContactForm>,
}

impl OnboardingForm {
    /// Cross-field rules and conversion into typed profile data. Assumes
    /// [`Validate::validate`] already passed.
    pub fn normalize(self, user_id: Uuid, now: DateTime<Utc>) -> std::result::Result<ProfileData, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let date_of_birth = parse_date(&self.date_of_birth).filter(|dob| *dob < now);
        if date_of_birth.is_none() {
            errors.add("date_of_birth", invalid("past_date", "Date of birth must be in the past."));
        }

        let kind = self.work_authorization_type.parse::<WorkAuthorizationType>().ok();
        let title = non_blank(self.work_authorization_title);
        if kind == Some(WorkAuthorizationType::Other) && title.is_none() {
            errors.add(
                "work_authorization_title",
                invalid("required", "A title is required for OTHER work authorization."),
            );
        }

        let start_date = self.work_authorization_start.as_deref().and_then(parse_date);
        let end_date = self.work_authorization_end.as_deref().and_then(parse_date);
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end <= start {
                errors.add(
                    "work_authorization_end",
                    invalid("date_range", "End date must be after start date."),
                );
            }
        }

        let driver_license = self.driver_license.and_then(|license| {
            parse_date(&license.expiration_date).map(|expiration_date| DriverLicense {
                number: license.number,
                expiration_date,
            })
        });

        for (field, key) in [
            ("profile_picture_key", &self.profile_picture_key),
            ("driver_license_key", &self.driver_license_key),
        ] {
            if key.as_deref().is_some_and(|k| !uploads::owns_key(user_id, k)) {
                errors.add(field, invalid("ownership", "File does not belong to you."));
            }
        }

        let (Some(date_of_birth), Some(kind), Ok(gender)) =
            (date_of_birth, kind, self.gender.parse::<Gender>())
        else {
            if errors.is_empty() {
                errors.add("gender", invalid("gender", "Gender must be MALE, FEMALE or NO_ANSWER."));
            }
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ProfileData {
            first_name: self.first_name.trim().to_owned(),
            last_name: self.last_name.trim().to_owned(),
            middle_name: non_blank(self.middle_name),
            preferred_name: non_blank(self.preferred_name),
            profile_picture_key: self.profile_picture_key,
            address: self.address.into(),
            cell_phone: self.cell_phone,
            work_phone: non_blank(self.work_phone),
            car_information: self.car_information.map(Into::into),
            ssn: self.ssn,
            date_of_birth,
            gender,
            work_authorization: WorkAuthorization {
                kind,
                title: if kind == WorkAuthorizationType::Other { title } else { None },
                start_date,
                end_date,
            },
            driver_license,
            driver_license_key: self.driver_license_key,
            reference: self.reference.map(Into::into),
            emergency_contacts: self.emergency_contacts.into_iter().map(Into::into).collect(),
        })
    }
}

/// Employee view of their onboarding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingView {
    pub status: OnboardingStatus,
    pub feedback: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub profile: Option<EmployeeProfile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub status: ReviewStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDetail {
    pub application: OnboardingApplication,
    pub account: Account,
    pub profile: Option<EmployeeProfile>,
}

async fn store_submission(
    state: &AppState,
    account: &Account,
    form: OnboardingForm,
    allowed_from: &[OnboardingStatus],
    action: &'static str,
) -> Result<OnboardingApplication> {
    let now = state.clock.now();
    let snapshot = serde_json::to_value(&form)?;
    let data = form.normalize(account.id, now)?;

    let application = OnboardingApplication::submitted(account.id, snapshot, now);
    match state
        .db
        .submit_application(&data, &application, allowed_from)
        .await?
    {
        Guarded::Applied(application) => {
            tracing::info!(user_id = %account.id, application_id = %application.id, action, "onboarding submitted");
            metrics::counter!("onboarding_submissions_total").increment(1);

            Ok(application)
        },
        Guarded::Refused(current) => Err(ServerError::InvalidState {
            entity: "onboarding application",
            current: current.to_string(),
            action,
        }),
    }
}

/// First submission, or an edit while still pending or after a rejection.
pub async fn submit(state: &AppState, account: &Account, form: OnboardingForm) -> Result<OnboardingApplication> {
    store_submission(
        state,
        account,
        form,
        &[
            OnboardingStatus::NotStarted,
            OnboardingStatus::Pending,
            OnboardingStatus::Rejected,
        ],
        "submit",
    )
    .await
}

/// Resubmission, only after a rejection.
pub async fn resubmit(state: &AppState, account: &Account, form: OnboardingForm) -> Result<OnboardingApplication> {
    store_submission(state, account, form, &[OnboardingStatus::Rejected], "resubmit").await
}

pub async fn approve(state: &AppState, reviewer: &Account, id: Uuid) -> Result<OnboardingApplication> {
    ReviewCoordinator::review(state, id, reviewer, Decision::Approve).await
}

pub async fn reject(state: &AppState, reviewer: &Account, id: Uuid, feedback: &str) -> Result<OnboardingApplication> {
    let decision = Decision::reject(feedback)?;
    ReviewCoordinator::review(state, id, reviewer, decision).await
}

pub async fn view(state: &AppState, account: &Account) -> Result<OnboardingView> {
    let application = state.db.find_application_by_user(account.id).await?;
    let profile = state.db.find_profile_by_user(account.id).await?;

    Ok(OnboardingView {
        status: account.onboarding_status,
        feedback: application
            .as_ref()
            .map(|a| a.feedback.clone())
            .unwrap_or_default(),
        submitted_at: application.as_ref().map(|a| a.submitted_at),
        profile: application.and(profile),
    })
}

/// HR listing, optionally filtered by a case-insensitive status.
pub async fn list(state: &AppState, status: Option<&str>) -> Result<Vec<ApplicationSummary>> {
    let status = status
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ReviewStatus>)
        .transpose()
        .map_err(|_| ServerError::field("status", "status", "Status must be PENDING, APPROVED or REJECTED."))?;

    let applications = state.db.list_applications(status).await?;
    let ids: Vec<Uuid> = applications.iter().map(|a| a.user_id).collect();
    let accounts = state.db.find_accounts(&ids).await?;

    Ok(applications
        .into_iter()
        .filter_map(|application| {
            let account = accounts.iter().find(|a| a.id == application.user_id)?;
            Some(ApplicationSummary {
                id: application.id,
                user_id: application.user_id,
                username: account.username.clone(),
                email: account.email.clone(),
                status: application.status,
                submitted_at: application.submitted_at,
                updated_at: application.updated_at,
            })
        })
        .collect())
}

pub async fn detail(state: &AppState, id: Uuid) -> Result<ApplicationDetail> {
    let application = state
        .db
        .find_application(id)
        .await?
        .ok_or(ServerError::NotFound("onboarding application"))?;
    let account = state
        .db
        .find_account(application.user_id)
        .await?
        .ok_or(ServerError::NotFound("account"))?;
    let profile = state.db.find_profile_by_user(application.user_id).await?;

    Ok(ApplicationDetail {
        application,
        account,
        profile,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::router::tests::harness;

    /// Complete, valid payload.
    pub fn form(kind: WorkAuthorizationType) -> OnboardingForm {
        OnboardingForm {
            first_name: "Alice".into(),
            last_name: "Martin".into(),
            middle_name: None,
            preferred_name: Some("Ali".into()),
            profile_picture_key: None,
            address: AddressForm {
                unit: Some("4B".into()),
                street: "1 Main St".into(),
                city: "Springfield".into(),
                state: "IL".into(),
                zip: "62701".into(),
            },
            cell_phone: "(555) 123-4567".into(),
            work_phone: None,
            car_information: None,
            ssn: "123-45-6789".into(),
            date_of_birth: "1995-06-01".into(),
            gender: "FEMALE".into(),
            work_authorization_type: kind.to_string(),
            work_authorization_title: None,
            work_authorization_start: Some("2024-01-01".into()),
            work_authorization_end: Some("2026-12-31".into()),
            driver_license: None,
            driver_license_key: None,
            reference: None,
            emergency_contacts: vec![ContactForm {
                first_name: "Bob".into(),
                last_name: "Martin".into(),
                middle_name: None,
                phone: "5551234567".into(),
                email: None,
                relationship: "Brother".into(),
            }],
        }
    }

    #[test]
    fn test_field_rules() {
        let mut bad = form(WorkAuthorizationType::H1b);
        bad.ssn = "123456789".into();
        bad.cell_phone = "12345".into();
        bad.date_of_birth = "01/06/1995".into();
        bad.address.zip = "ABCDE".into();
        bad.gender = "unknown".into();
        bad.emergency_contacts.clear();

        let errors = bad.validate().unwrap_err();
        let fields = errors.errors();
        assert_eq!(fields.len(), 6);
        for field in ["ssn", "address", "gender"] {
            assert!(fields.contains_key(field), "missing error on {field}");
        }

        assert!(form(WorkAuthorizationType::F1CptOpt).validate().is_ok());
    }

    #[test]
    fn test_cross_field_rules() {
        let now = Utc::now();
        let user_id = Uuid::new_v4();

        let mut other = form(WorkAuthorizationType::Other);
        assert!(other.clone().normalize(user_id, now).is_err());
        other.work_authorization_title = Some("TN visa".into());
        let data = other.normalize(user_id, now).unwrap();
        assert_eq!(data.work_authorization.display_title(), "TN visa");

        let mut reversed = form(WorkAuthorizationType::H1b);
        reversed.work_authorization_end = Some("2023-01-01".into());
        assert!(reversed.normalize(user_id, now).is_err());

        let mut unborn = form(WorkAuthorizationType::Citizen);
        unborn.date_of_birth = "2999-01-01".into();
        assert!(unborn.normalize(user_id, now).is_err());

        let mut foreign = form(WorkAuthorizationType::Citizen);
        foreign.profile_picture_key = Some(format!("users/{}/profile_picture.png", Uuid::new_v4()));
        assert!(foreign.normalize(user_id, now).is_err());

        let data = form(WorkAuthorizationType::Citizen).normalize(user_id, now).unwrap();
        assert_eq!(data.date_of_birth.to_rfc3339(), "1995-06-01T00:00:00+00:00");
        assert_eq!(data.address.building_apt.as_deref(), Some("4B"));
        assert!(data.work_authorization.title.is_none());
    }

    #[tokio::test]
    async fn test_submit_approve_scenario() {
        let harness = harness();
        let hr = harness.hr().await;
        let alice = harness.employee("alice").await;

        let application = submit(&harness.state, &alice, form(WorkAuthorizationType::H1b))
            .await
            .unwrap();
        assert_eq!(application.status, ReviewStatus::Pending);
        assert_eq!(application.snapshot["ssn"], "123-45-6789");
        assert_eq!(harness.account(alice.id).await.onboarding_status, OnboardingStatus::Pending);

        let profile = harness.state.db.find_profile_by_user(alice.id).await.unwrap().unwrap();
        assert_eq!(profile.first_name, "Alice");

        let approved = approve(&harness.state, &hr, application.id).await.unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert_eq!(approved.feedback, "");
        assert_eq!(approved.reviewed_by, Some(hr.id));
        assert_eq!(harness.account(alice.id).await.onboarding_status, OnboardingStatus::Approved);

        // Terminal for this cycle.
        let alice = harness.account(alice.id).await;
        assert!(matches!(
            submit(&harness.state, &alice, form(WorkAuthorizationType::H1b)).await,
            Err(ServerError::InvalidState { .. })
        ));
        assert!(matches!(
            approve(&harness.state, &hr, application.id).await,
            Err(ServerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_then_resubmit_scenario() {
        let harness = harness();
        let hr = harness.hr().await;
        let alice = harness.employee("alice").await;
        let application = submit(&harness.state, &alice, form(WorkAuthorizationType::L2))
            .await
            .unwrap();

        // Resubmission is only for rejected applications.
        let pending = harness.account(alice.id).await;
        assert!(matches!(
            resubmit(&harness.state, &pending, form(WorkAuthorizationType::L2)).await,
            Err(ServerError::InvalidState { .. })
        ));

        assert!(matches!(
            reject(&harness.state, &hr, application.id, "  ").await,
            Err(ServerError::Validation(_))
        ));
        let untouched = harness.state.db.find_application(application.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ReviewStatus::Pending);

        let rejected = reject(&harness.state, &hr, application.id, "fix X").await.unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.feedback, "fix X");
        let alice = harness.account(alice.id).await;
        assert_eq!(alice.onboarding_status, OnboardingStatus::Rejected);

        let view = view(&harness.state, &alice).await.unwrap();
        assert_eq!(view.feedback, "fix X");

        let resubmitted = resubmit(&harness.state, &alice, form(WorkAuthorizationType::L2))
            .await
            .unwrap();
        assert_eq!(resubmitted.id, application.id);
        assert_eq!(resubmitted.status, ReviewStatus::Pending);
        assert_eq!(resubmitted.feedback, "");
        assert_eq!(harness.account(alice.id).await.onboarding_status, OnboardingStatus::Pending);
    }

    #[tokio::test]
    async fn test_hr_listing_filters_by_status() {
        let harness = harness();
        let hr = harness.hr().await;
        let alice = harness.employee("alice").await;
        let bob = harness.employee("bob").await;
        let first = submit(&harness.state, &alice, form(WorkAuthorizationType::H1b)).await.unwrap();
        submit(&harness.state, &bob, form(WorkAuthorizationType::H1b)).await.unwrap();
        approve(&harness.state, &hr, first.id).await.unwrap();

        let pending = list(&harness.state, Some("pending")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].username, "bob");
        assert_eq!(list(&harness.state, None).await.unwrap().len(), 2);
        assert!(list(&harness.state, Some("archived")).await.is_err());

        let detail = detail(&harness.state, first.id).await.unwrap();
        assert_eq!(detail.account.id, alice.id);
        assert!(detail.profile.is_some());
    }
}
