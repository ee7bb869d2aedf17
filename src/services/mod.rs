//! Application services
pub mod checkout;
pub mod ledger;
pub mod orders;

pub use checkout::{CheckoutRequest, OrderAssembler};
pub use ledger::{CartLedger, CartSession, CartSnapshot};
pub use orders::OrderService;
