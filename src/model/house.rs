use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::labeled_enum;

labeled_enum! {
    pub enum HouseStatus {
        Active => "ACTIVE",
        Inactive => "INACTIVE",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseAddress {
    pub unit: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landlord {
    pub full_name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub mattresses: u32,
    pub tables: u32,
    pub chairs: u32,
}

/// Shared residence. Residents point at it through `EmployeeProfile::house_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct House {
    pub id: Uuid,
    pub address: HouseAddress,
    pub landlord: Landlord,
    pub facility: Facility,
    pub status: HouseStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl HouseAddress {
    pub fn one_line(&self) -> String {
        let street = match self.unit.as_deref().filter(|u| !u.is_empty()) {
            Some(unit) => format!("{}, {}", self.street, unit),
            None => self.street.clone(),
        };
        format!("{street}, {}, {} {}", self.city, self.state, self.zip)
    }
}
