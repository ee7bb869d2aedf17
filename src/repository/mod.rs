//! Collaborator contracts the ledger and checkout are written against.
//!
//! `MemoryStore` backs tests and the demo catalog; `PgStore` is the production
//! backend. Both implement every trait here.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::aggregates::{Address, Cart, NewAddress, Order, Product, Variant};
use crate::domain::value_objects::UserId;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read-only product lookup.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Returns the product with all of its variants.
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>>;

    async fn get_variant(&self, product_id: &str, variant_id: &str) -> Result<Option<Variant>> {
        Ok(self.get_product(product_id).await?.and_then(|p| p.variant(variant_id).cloned()))
    }
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn load_cart(&self, user_id: &UserId) -> Result<Cart>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn clear_cart(&self, user_id: &UserId) -> Result<()>;
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn list_addresses(&self, user_id: &UserId) -> Result<Vec<Address>>;
    async fn get_address(&self, user_id: &UserId, address_id: Uuid) -> Result<Option<Address>>;
    /// Stores a validated address; the first one a user saves becomes the default.
    async fn create_address(&self, user_id: &UserId, address: NewAddress) -> Result<Address>;
}

/// The order sink: once `submit_order` returns, the order is committed and
/// the purchased stock has been taken out of the catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn submit_order(&self, order: &Order) -> Result<Uuid>;
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Newest first.
    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>>;
    async fn save_status(&self, order: &Order) -> Result<()>;
}

/// Who is signed in, if anyone.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// An identity fixed at construction, e.g. taken from a request header.
#[derive(Clone, Debug, Default)]
pub struct SessionIdentity(Option<UserId>);

impl SessionIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self { Self(Some(UserId::new(user_id))) }
    pub fn anonymous() -> Self { Self(None) }
}

impl Identity for SessionIdentity {
    fn current_user_id(&self) -> Option<UserId> { self.0.clone() }
}
