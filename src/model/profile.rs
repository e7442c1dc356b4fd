use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Gender, WorkAuthorizationType};

const PLACEHOLDER: &str = "PENDING";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub building_apt: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarInformation {
    pub make: String,
    pub model: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLicense {
    pub number: String,
    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkAuthorization {
    #[serde(rename = "type")]
    pub kind: WorkAuthorizationType,
    /// Free-form title, only meaningful for [`WorkAuthorizationType::Other`].
    pub title: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl WorkAuthorization {
    /// Label shown to HR.
    pub fn display_title(&self) -> String {
        match (&self.kind, &self.title) {
            (WorkAuthorizationType::Other, Some(title)) => title.clone(),
            (kind, _) => kind.to_string(),
        }
    }

    /// Whole days until the authorization ends, negative once past.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.end_date.map(|end| (end.date_naive() - now.date_naive()).num_days())
    }
}

/// Long-lived personal data, one per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub preferred_name: Option<String>,
    pub profile_picture_key: Option<String>,
    pub address: Address,
    pub cell_phone: String,
    pub work_phone: Option<String>,
    pub car_information: Option<CarInformation>,
    pub ssn: String,
    pub date_of_birth: DateTime<Utc>,
    pub gender: Gender,
    pub work_authorization: WorkAuthorization,
    pub driver_license: Option<DriverLicense>,
    pub driver_license_key: Option<String>,
    pub reference: Option<Contact>,
    pub emergency_contacts: Vec<Contact>,
    /// Back-reference to the assigned house; residents are derived from it.
    pub house_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Personal data collected by the onboarding form, once normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileData {
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub preferred_name: Option<String>,
    pub profile_picture_key: Option<String>,
    pub address: Address,
    pub cell_phone: String,
    pub work_phone: Option<String>,
    pub car_information: Option<CarInformation>,
    pub ssn: String,
    pub date_of_birth: DateTime<Utc>,
    pub gender: Gender,
    pub work_authorization: WorkAuthorization,
    pub driver_license: Option<DriverLicense>,
    pub driver_license_key: Option<String>,
    pub reference: Option<Contact>,
    pub emergency_contacts: Vec<Contact>,
}

/// Midnight UTC for a calendar date.
pub fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

impl EmployeeProfile {
    /// Profile created at registration, before any onboarding submission.
    pub fn placeholder(user_id: Uuid, now: DateTime<Utc>) -> Self {
        let pending = || PLACEHOLDER.to_owned();
        let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)
            .map(utc_midnight)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self {
            id: Uuid::new_v4(),
            user_id,
            first_name: pending(),
            last_name: pending(),
            middle_name: None,
            preferred_name: None,
            profile_picture_key: None,
            address: Address {
                building_apt: None,
                street: pending(),
                city: pending(),
                state: pending(),
                zip: pending(),
            },
            cell_phone: pending(),
            work_phone: None,
            car_information: None,
            ssn: pending(),
            date_of_birth: epoch,
            gender: Gender::NoAnswer,
            work_authorization: WorkAuthorization {
                kind: WorkAuthorizationType::Other,
                title: Some(pending()),
                start_date: None,
                end_date: None,
            },
            driver_license: None,
            driver_license_key: None,
            reference: None,
            emergency_contacts: vec![Contact {
                first_name: pending(),
                last_name: pending(),
                middle_name: None,
                phone: pending(),
                email: None,
                relationship: pending(),
            }],
            house_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace every personal field with a fresh submission. Identity,
    /// house assignment and creation time are kept.
    pub fn apply(&mut self, data: ProfileData, now: DateTime<Utc>) {
        self.first_name = data.first_name;
        self.last_name = data.last_name;
        self.middle_name = data.middle_name;
        self.preferred_name = data.preferred_name;
        if data.profile_picture_key.is_some() {
            self.profile_picture_key = data.profile_picture_key;
        }
        self.address = data.address;
        self.cell_phone = data.cell_phone;
        self.work_phone = data.work_phone;
        self.car_information = data.car_information;
        self.ssn = data.ssn;
        self.date_of_birth = data.date_of_birth;
        self.gender = data.gender;
        self.work_authorization = data.work_authorization;
        self.driver_license = data.driver_license;
        if data.driver_license_key.is_some() {
            self.driver_license_key = data.driver_license_key;
        }
        self.reference = data.reference;
        self.emergency_contacts = data.emergency_contacts;
        self.updated_at = now;
    }

    /// Name used when addressing the employee.
    pub fn greeting_name(&self) -> &str {
        self.preferred_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.first_name)
    }

    pub fn full_name(&self) -> String {
        match self.middle_name.as_deref().filter(|m| !m.is_empty()) {
            Some(middle) => format!("{} {} {}", self.first_name, middle, self.last_name),
            None => format!("{} {}", self.first_name, self.last_name),
        }
    }

    pub fn is_opt_track(&self) -> bool {
        self.work_authorization.kind == WorkAuthorizationType::F1CptOpt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_placeholder_is_fully_pending() {
        let profile = EmployeeProfile::placeholder(Uuid::new_v4(), Utc::now());
        assert_eq!(profile.first_name, PLACEHOLDER);
        assert_eq!(profile.ssn, PLACEHOLDER);
        assert_eq!(profile.emergency_contacts.len(), 1);
        assert_eq!(profile.work_authorization.kind, WorkAuthorizationType::Other);
        assert_eq!(profile.date_of_birth.to_rfc3339(), "1900-01-01T00:00:00+00:00");
        assert!(profile.house_id.is_none());
    }

    #[test]
    fn test_days_remaining_counts_calendar_days() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        let auth = WorkAuthorization {
            kind: WorkAuthorizationType::F1CptOpt,
            title: None,
            start_date: None,
            end_date: Some(Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap()),
        };
        assert_eq!(auth.days_remaining(now), Some(10));
    }

    #[test]
    fn test_preferred_name_wins_when_present() {
        let mut profile = EmployeeProfile::placeholder(Uuid::new_v4(), Utc::now());
        profile.first_name = "Robert".into();
        assert_eq!(profile.greeting_name(), "Robert");
        profile.preferred_name = Some("Bob".into());
        assert_eq!(profile.greeting_name(), "Bob");
    }
}
