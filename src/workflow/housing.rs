//! House inventory and random resident assignment.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::database::{AccountStore, HouseStore, ProfileStore};
use crate::error::{Result, ServerError};
use crate::model::{
    Account, CarInformation, Facility, House, HouseAddress, HouseStatus, Landlord,
};

/// Put the employee in a uniformly random active house. Already housed
/// employees and an empty inventory are soft no-ops.
pub async fn assign(state: &AppState, user_id: Uuid) -> Result<Option<House>> {
    let profile = state
        .db
        .find_profile_by_user(user_id)
        .await?
        .ok_or(ServerError::NotFound("profile"))?;
    if profile.house_id.is_some() {
        return Ok(None);
    }

    let count = state.db.count_houses(HouseStatus::Active).await?;
    if count == 0 {
        tracing::warn!(%user_id, "no active house available, assignment skipped");
        return Ok(None);
    }

    let offset = OsRng.gen_range(0..count);
    let Some(house) = state.db.nth_house(HouseStatus::Active, offset).await? else {
        // Inventory shrank between count and pick.
        return Ok(None);
    };

    if !state.db.assign_house(user_id, house.id).await? {
        return Ok(None);
    }

    tracing::info!(%user_id, house_id = %house.id, "employee assigned to house");
    metrics::counter!("house_assignments_total").increment(1);

    Ok(Some(house))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressForm {
    pub unit: Option<String>,
    #[validate(length(min = 1, message = "Street is required."))]
    pub street: String,
    #[validate(length(min = 1, message = "City is required."))]
    pub city: String,
    #[validate(length(min = 2, message = "State is required."))]
    pub state: String,
    #[validate(custom(function = "crate::workflow::onboarding::validate_zip"))]
    pub zip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LandlordForm {
    #[validate(length(min = 1, message = "Landlord name is required."))]
    pub full_name: String,
    #[validate(custom(function = "crate::workflow::onboarding::validate_phone"))]
    pub phone: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// New house, as submitted by HR.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewHouse {
    #[validate(nested)]
    pub address: AddressForm,
    #[validate(nested)]
    pub landlord: LandlordForm,
    #[serde(default)]
    pub facility: Facility,
    pub status: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Description is too long."))]
    pub description: String,
}

/// House with its occupancy, for HR listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseSummary {
    pub id: Uuid,
    pub address: String,
    pub landlord: Landlord,
    pub facility: Facility,
    pub status: HouseStatus,
    pub resident_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub car: Option<CarInformation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseDetails {
    #[serde(flatten)]
    pub house: House,
    pub residents: Vec<Resident>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Roommate {
    pub name: String,
    pub phone: String,
}

/// Employee view of their own house.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyHouse {
    pub id: Uuid,
    pub address: String,
    pub roommates: Vec<Roommate>,
}

pub async fn create(state: &AppState, form: NewHouse) -> Result<House> {
    let house = form.into_house(state.clock.now())?;
    state.db.insert_house(&house).await?;

    tracing::info!(house_id = %house.id, address = house.address.one_line(), "house created");

    Ok(house)
}

impl NewHouse {
    /// Build the stored record. Status defaults to ACTIVE.
    pub fn into_house(self, now: DateTime<Utc>) -> Result<House> {
        let status = match self.status.as_deref() {
            Some(status) => status
                .parse()
                .map_err(|_| ServerError::field("status", "status", "Status must be ACTIVE or INACTIVE."))?,
            None => HouseStatus::Active,
        };

        Ok(House {
            id: Uuid::new_v4(),
            address: HouseAddress {
                unit: self.address.unit.filter(|u| !u.trim().is_empty()),
                street: self.address.street,
                city: self.address.city,
                state: self.address.state,
                zip: self.address.zip,
            },
            landlord: Landlord {
                full_name: self.landlord.full_name,
                phone: self.landlord.phone,
                email: self.landlord.email,
            },
            facility: self.facility,
            status,
            description: self.description,
            created_at: now,
        })
    }
}

pub async fn list(state: &AppState) -> Result<Vec<HouseSummary>> {
    let houses = state.db.list_houses().await?;

    let mut summaries = Vec::with_capacity(houses.len());
    for house in houses {
        let residents = state.db.profiles_in_house(house.id).await?;
        summaries.push(HouseSummary {
            id: house.id,
            address: house.address.one_line(),
            landlord: house.landlord,
            facility: house.facility,
            status: house.status,
            resident_count: residents.len(),
        });
    }

    Ok(summaries)
}

pub async fn details(state: &AppState, id: Uuid) -> Result<HouseDetails> {
    let house = state
        .db
        .find_house(id)
        .await?
        .ok_or(ServerError::NotFound("house"))?;

    let profiles = state.db.profiles_in_house(id).await?;
    let ids: Vec<Uuid> = profiles.iter().map(|p| p.user_id).collect();
    let accounts = state.db.find_accounts(&ids).await?;

    let residents = profiles
        .into_iter()
        .map(|profile| Resident {
            user_id: profile.user_id,
            name: profile.full_name(),
            email: accounts
                .iter()
                .find(|a| a.id == profile.user_id)
                .map(|a| a.email.clone()),
            phone: profile.cell_phone,
            car: profile.car_information,
        })
        .collect();

    Ok(HouseDetails { house, residents })
}

pub async fn mine(state: &AppState, account: &Account) -> Result<MyHouse> {
    let profile = state
        .db
        .find_profile_by_user(account.id)
        .await?
        .ok_or(ServerError::NotFound("profile"))?;
    let house_id = profile.house_id.ok_or(ServerError::NotFound("house"))?;
    let house = state
        .db
        .find_house(house_id)
        .await?
        .ok_or(ServerError::NotFound("house"))?;

    let roommates = state
        .db
        .profiles_in_house(house_id)
        .await?
        .into_iter()
        .filter(|p| p.user_id != account.id)
        .map(|p| Roommate {
            name: p.greeting_name().to_owned(),
            phone: p.cell_phone,
        })
        .collect();

    Ok(MyHouse {
        id: house.id,
        address: house.address.one_line(),
        roommates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::harness;

    #[tokio::test]
    async fn test_assignment_is_idempotent() {
        let harness = harness();
        let alice = harness.employee("alice").await;
        assert!(assign(&harness.state, alice.id).await.unwrap().is_none());

        let house = harness.house().await;
        let assigned = assign(&harness.state, alice.id).await.unwrap();
        assert_eq!(assigned.map(|h| h.id), Some(house.id));

        harness.house().await;
        assert!(assign(&harness.state, alice.id).await.unwrap().is_none());
        let profile = harness.state.db.find_profile_by_user(alice.id).await.unwrap().unwrap();
        assert_eq!(profile.house_id, Some(house.id));
    }

    #[tokio::test]
    async fn test_inactive_houses_are_skipped() {
        let harness = harness();
        let mut form = harness.house_form();
        form.status = Some("inactive".into());
        create(&harness.state, form).await.unwrap();

        let alice = harness.employee("alice").await;
        assert!(assign(&harness.state, alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assignment_spreads_residents() {
        let harness = harness();
        for _ in 0..3 {
            harness.house().await;
        }

        for i in 0..60 {
            let employee = harness.employee(&format!("emp{i}")).await;
            assign(&harness.state, employee.id).await.unwrap();
        }

        let summaries = list(&harness.state).await.unwrap();
        assert_eq!(summaries.iter().map(|s| s.resident_count).sum::<usize>(), 60);
        // With 60 uniform picks over 3 houses, an empty house is vanishingly unlikely.
        assert!(summaries.iter().all(|s| s.resident_count > 0));
    }

    #[tokio::test]
    async fn test_residents_and_roommates() {
        let harness = harness();
        let house = harness.house().await;
        let alice = harness.employee("alice").await;
        let bob = harness.employee("bob").await;
        assign(&harness.state, alice.id).await.unwrap();
        assign(&harness.state, bob.id).await.unwrap();

        let details = details(&harness.state, house.id).await.unwrap();
        assert_eq!(details.residents.len(), 2);
        assert!(details.residents.iter().any(|r| r.email.as_deref() == Some("alice@x.com")));

        let mine = mine(&harness.state, &alice).await.unwrap();
        assert_eq!(mine.id, house.id);
        assert_eq!(mine.roommates.len(), 1);

        let carol = harness.employee("carol").await;
        harness.state.db.assign_house(carol.id, Uuid::new_v4()).await.unwrap();
        assert!(matches!(
            super::mine(&harness.state, &carol).await,
            Err(ServerError::NotFound("house"))
        ));
    }
}
