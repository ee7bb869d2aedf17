//! Shipping addresses

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::UserId;
use crate::{EcommerceError, Result};

/// A saved, complete address. Only built from a validated [`NewAddress`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
}

/// Address fields as entered at checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewAddress {
    #[validate(length(min = 1))]
    #[serde(default)]
    pub full_name: String,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub phone: String,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub city: String,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub state: String,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub postal_code: String,
    #[validate(length(min = 1))]
    #[serde(default)]
    pub country: String,
}

/// Where an order ships to: an address from the book or a fresh one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressSelection {
    Saved { id: Uuid },
    New { address: NewAddress },
}

impl NewAddress {
    /// Trims every field and checks that the required ones are filled in.
    pub fn validated(self) -> Result<NewAddress> {
        let trimmed = NewAddress {
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            line1: self.line1.trim().to_string(),
            line2: self.line2.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
        };
        if let Err(errors) = trimmed.validate() {
            let mut missing: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
            missing.sort();
            return Err(EcommerceError::InvalidAddress(missing));
        }
        Ok(trimmed)
    }

    /// Turns validated fields into a saved address.
    pub fn into_address(self, user_id: UserId, is_default: bool) -> Address {
        Address {
            id: Uuid::now_v7(), user_id, full_name: self.full_name, phone: self.phone, line1: self.line1,
            line2: self.line2, city: self.city, state: self.state, postal_code: self.postal_code,
            country: self.country, is_default,
        }
    }
}
