//! Employee directory for HR and self-service profile edits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::database::{AccountStore, ProfileStore};
use crate::error::{Result, ServerError};
use crate::model::{Account, EmployeeProfile};

use super::housing::AddressForm;
use super::onboarding::{CarForm, ContactForm, validate_phone};
use super::uploads::owns_key;

/// Directory row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSummary {
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub name: String,
    pub preferred_name: Option<String>,
    pub ssn: String,
    pub work_authorization_title: String,
    pub phone: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub total: usize,
    pub employees: Vec<EmployeeSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub account: Account,
    pub profile: EmployeeProfile,
}

/// Self-service edit. Absent sections are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 50, message = "First name is required."))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Last name is required."))]
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub preferred_name: Option<String>,
    #[validate(nested)]
    pub address: Option<AddressForm>,
    #[validate(custom(function = "validate_phone"))]
    pub cell_phone: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub work_phone: Option<String>,
    #[validate(nested)]
    pub car_information: Option<CarForm>,
    #[validate(nested)]
    pub reference: Option<ContactForm>,
    #[validate(length(min = 1, message = "At least one emergency contact is required."), nested)]
    pub emergency_contacts: Option<Vec<ContactForm>>,
    pub profile_picture_key: Option<String>,
}

impl ProfileUpdate {
    fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.middle_name.is_none()
            && self.preferred_name.is_none()
            && self.address.is_none()
            && self.cell_phone.is_none()
            && self.work_phone.is_none()
            && self.car_information.is_none()
            && self.reference.is_none()
            && self.emergency_contacts.is_none()
            && self.profile_picture_key.is_none()
    }

    fn apply(self, profile: &mut EmployeeProfile) {
        let optional = |value: String| Some(value.trim().to_owned()).filter(|v| !v.is_empty());

        if let Some(first_name) = self.first_name {
            profile.first_name = first_name.trim().to_owned();
        }
        if let Some(last_name) = self.last_name {
            profile.last_name = last_name.trim().to_owned();
        }
        if let Some(middle_name) = self.middle_name {
            profile.middle_name = optional(middle_name);
        }
        if let Some(preferred_name) = self.preferred_name {
            profile.preferred_name = optional(preferred_name);
        }
        if let Some(address) = self.address {
            profile.address = address.into();
        }
        if let Some(cell_phone) = self.cell_phone {
            profile.cell_phone = cell_phone;
        }
        if let Some(work_phone) = self.work_phone {
            profile.work_phone = optional(work_phone);
        }
        if let Some(car) = self.car_information {
            profile.car_information = Some(car.into());
        }
        if let Some(reference) = self.reference {
            profile.reference = Some(reference.into());
        }
        if let Some(contacts) = self.emergency_contacts {
            profile.emergency_contacts = contacts.into_iter().map(Into::into).collect();
        }
        if let Some(key) = self.profile_picture_key {
            profile.profile_picture_key = Some(key);
        }
    }
}

/// Every employee, sorted by last then first name.
pub async fn directory(state: &AppState) -> Result<Directory> {
    let mut profiles = state.db.list_profiles().await?;
    profiles.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));

    let ids: Vec<Uuid> = profiles.iter().map(|p| p.user_id).collect();
    let accounts = state.db.find_accounts(&ids).await?;

    let employees: Vec<_> = profiles
        .into_iter()
        .filter_map(|profile| {
            let account = accounts
                .iter()
                .find(|a| a.id == profile.user_id && !a.is_hr())?;

            Some(EmployeeSummary {
                user_id: profile.user_id,
                profile_id: profile.id,
                name: profile.full_name(),
                work_authorization_title: profile.work_authorization.display_title(),
                preferred_name: profile.preferred_name,
                ssn: profile.ssn,
                phone: profile.cell_phone,
                email: account.email.clone(),
                username: account.username.clone(),
            })
        })
        .collect();

    Ok(Directory {
        total: employees.len(),
        employees,
    })
}

/// Look an employee up by profile id, then by account id.
pub async fn find(state: &AppState, id: Uuid) -> Result<EmployeeView> {
    let profile = match state.db.find_profile(id).await? {
        Some(profile) => profile,
        None => state
            .db
            .find_profile_by_user(id)
            .await?
            .ok_or(ServerError::NotFound("employee"))?,
    };
    let account = state
        .db
        .find_account(profile.user_id)
        .await?
        .ok_or(ServerError::NotFound("employee"))?;

    Ok(EmployeeView { account, profile })
}

pub async fn me(state: &AppState, account: &Account) -> Result<EmployeeProfile> {
    state
        .db
        .find_profile_by_user(account.id)
        .await?
        .ok_or(ServerError::NotFound("profile"))
}

pub async fn update_me(state: &AppState, account: &Account, update: ProfileUpdate) -> Result<EmployeeProfile> {
    if update.is_empty() {
        return Err(ServerError::field("profile", "empty", "Nothing to update."));
    }
    update.validate()?;
    if let Some(key) = &update.profile_picture_key {
        if !owns_key(account.id, key) {
            return Err(ServerError::field(
                "profile_picture_key",
                "ownership",
                "File must be uploaded by this account.",
            ));
        }
    }

    let now = state.clock.now();
    let profile = state
        .db
        .modify_profile(
            account.id,
            Box::new(move |profile| {
                update.apply(profile);
                profile.updated_at = now;
            }),
        )
        .await?
        .ok_or(ServerError::NotFound("profile"))?;

    tracing::info!(user_id = %account.id, "profile updated");

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::harness;

    #[tokio::test]
    async fn test_directory_lists_employees_by_name() {
        let harness = harness();
        harness.hr().await;
        let (alice, _) = harness.opt_employee("alice").await;
        let bob = harness.employee("bob").await;

        let directory = directory(&harness.state).await.unwrap();
        assert_eq!(directory.total, 2);
        // Placeholder profiles sort under "PENDING".
        let names: Vec<_> = directory.employees.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob"]);
        assert_eq!(directory.employees[0].work_authorization_title, "F1_CPT_OPT");

        let by_account = find(&harness.state, bob.id).await.unwrap();
        let by_profile = find(&harness.state, by_account.profile.id).await.unwrap();
        assert_eq!(by_profile.account.id, bob.id);
        assert_eq!(find(&harness.state, alice.id).await.unwrap().account.username, "alice");
        assert!(matches!(
            find(&harness.state, Uuid::new_v4()).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_updates_only_whitelisted_sections() {
        let harness = harness();
        let (alice, before) = harness.opt_employee("alice").await;

        assert!(matches!(
            update_me(&harness.state, &alice, ProfileUpdate::default()).await,
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            update_me(
                &harness.state,
                &alice,
                ProfileUpdate {
                    cell_phone: Some("12".into()),
                    ..Default::default()
                }
            )
            .await,
            Err(ServerError::Validation(_))
        ));

        let after = update_me(
            &harness.state,
            &alice,
            ProfileUpdate {
                preferred_name: Some("Lis".into()),
                cell_phone: Some("555-987-6543".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(after.preferred_name.as_deref(), Some("Lis"));
        assert_eq!(after.cell_phone, "555-987-6543");
        assert_eq!(after.ssn, before.ssn);
        assert_eq!(after.work_authorization, before.work_authorization);

        let unknown = serde_json::from_value::<ProfileUpdate>(serde_json::json!({ "ssn": "111-22-3333" }));
        assert!(unknown.is_err());

        let foreign = ProfileUpdate {
            profile_picture_key: Some(format!("users/{}/profile_picture.png", Uuid::new_v4())),
            ..Default::default()
        };
        assert!(update_me(&harness.state, &alice, foreign).await.is_err());
    }
}
