//! Catalog read model
//!
//! The storefront never writes these; they are what the catalog lookup hands
//! back when a cart line is created or re-validated.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub base_price: Money,
    #[serde(default)]
    pub image: Option<String>,
    pub stock_quantity: u32,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price_adjustment: Money,
    pub stock_quantity: u32,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool { true }

impl Product {
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Stock that bounds a cart line for this product, or for one of its variants.
    pub fn available_stock(&self, variant: Option<&Variant>) -> u32 {
        variant.map_or(self.stock_quantity, |v| v.stock_quantity)
    }

    pub fn unit_price(&self, variant: Option<&Variant>) -> Money {
        self.base_price + variant.map_or(Money::ZERO, |v| v.price_adjustment)
    }
}
