//! Aggregates module
pub mod address;
pub mod product;
pub mod order;
pub mod cart;

pub use address::{Address, AddressSelection, NewAddress};
pub use product::{Product, Variant};
pub use order::{DeliveryMethod, Order, OrderDraft, OrderItem, OrderStatus, OrderTotals, PaymentMethod};
pub use cart::{Cart, CartLine, QuantityChange, VariantSnapshot};
