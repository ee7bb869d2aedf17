//! OpenSASE Storefront
//!
//! Cart ledger and checkout for the self-hosted storefront.
//!
//! ## Features
//! - Per-customer cart ledger with merge-on-add and stock guards
//! - Serialized cart mutations, one worker per customer
//! - Order assembly with shipping, tax and delivery estimates
//! - Order status lifecycle
//! - In-memory and Postgres backends behind repository traits

pub mod api;
pub mod config;
pub mod domain;
pub mod publisher;
pub mod repository;
pub mod services;

use thiserror::Error;

pub use domain::value_objects::{Money, TaxRate, UserId};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{name} is out of stock (requested {requested}, available {available})")]
    OutOfStock { name: String, requested: u32, available: u32 },

    #[error("only {available} left in stock, cannot set quantity to {requested}")]
    StockExceeded { requested: u32, available: u32 },

    #[error("cart is empty")]
    EmptyCart,

    #[error("address is missing required fields: {}", .0.join(", "))]
    InvalidAddress(Vec<String>),

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("sign in to use the cart")]
    Unauthenticated,

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("cart ledger unavailable")]
    LedgerUnavailable,
}

impl EcommerceError {
    pub fn not_found(what: impl std::fmt::Display) -> Self { Self::NotFound(what.to_string()) }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::StorageError(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
