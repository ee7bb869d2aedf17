//! Order Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::address::Address;
use crate::domain::aggregates::cart::CartLine;
use crate::domain::value_objects::{Money, TaxRate, UserId};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: UserId,
    status: OrderStatus,
    items: Vec<OrderItem>,
    subtotal: Money,
    shipping_cost: Money,
    tax: Money,
    total: Money,
    delivery_method: DeliveryMethod,
    payment_method: PaymentMethod,
    shipping_address: Address,
    estimated_delivery: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A purchased line, priced as it was when the order was placed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub variant_name: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

impl From<&CartLine> for OrderItem {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            name: line.product_name.clone(),
            variant_name: line.variant.as_ref().map(|v| v.name.clone()),
            quantity: line.quantity,
            unit_price: line.unit_price(),
            total: line.line_total(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [Self::Pending, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled]
            .into_iter()
            .find(|s| s.as_str() == value)
    }

    pub fn is_terminal(self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Forward one step along the fulfilment path, or cancel before delivery.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
                | (Self::Pending | Self::Processing | Self::Shipped, Self::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Delivery speed. Unrecognised names fall back to `Standard`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeliveryMethod { #[default] Standard, Express, Overnight }

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self { Self::Standard => "standard", Self::Express => "express", Self::Overnight => "overnight" }
    }

    pub fn shipping_cost(self) -> Money {
        match self {
            Self::Standard => Money::from_major(5),
            Self::Express => Money::from_major(15),
            Self::Overnight => Money::from_major(30),
        }
    }

    pub fn transit_days(self) -> i64 {
        match self { Self::Standard => 7, Self::Express => 3, Self::Overnight => 1 }
    }
}

impl From<&str> for DeliveryMethod {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "express" => Self::Express,
            "overnight" => Self::Overnight,
            _ => Self::Standard,
        }
    }
}

impl From<String> for DeliveryMethod {
    fn from(value: String) -> Self { Self::from(value.as_str()) }
}

impl From<DeliveryMethod> for String {
    fn from(value: DeliveryMethod) -> Self { value.as_str().to_string() }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] Card, Paypal, BankTransfer, CashOnDelivery }

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Paypal => "paypal",
            Self::BankTransfer => "bank_transfer",
            Self::CashOnDelivery => "cash_on_delivery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [Self::Card, Self::Paypal, Self::BankTransfer, Self::CashOnDelivery]
            .into_iter()
            .find(|m| m.as_str() == value)
    }
}

/// Shipping, tax and total for a given subtotal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub total: Money,
}

impl OrderTotals {
    pub fn compute(subtotal: Money, delivery: DeliveryMethod, tax_rate: TaxRate) -> Self {
        let shipping_cost = delivery.shipping_cost();
        let tax = subtotal.apply_rate(tax_rate);
        Self { subtotal, shipping_cost, tax, total: subtotal + shipping_cost + tax }
    }
}

/// Checkout choices that go with a cart snapshot.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub user_id: UserId,
    pub shipping_address: Address,
    pub delivery_method: DeliveryMethod,
    pub payment_method: PaymentMethod,
    pub tax_rate: TaxRate,
}

impl Order {
    /// Prices a cart snapshot into a pending order.
    pub fn assemble(lines: &[CartLine], draft: OrderDraft, now: DateTime<Utc>) -> Result<Self> {
        if lines.is_empty() { return Err(EcommerceError::EmptyCart); }
        let items: Vec<OrderItem> = lines.iter().map(OrderItem::from).collect();
        let subtotal = items.iter().map(|i| i.total).sum();
        let totals = OrderTotals::compute(subtotal, draft.delivery_method, draft.tax_rate);
        Ok(Self {
            id: Uuid::now_v7(),
            order_number: order_number(now),
            user_id: draft.user_id,
            status: OrderStatus::Pending,
            items,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            tax: totals.tax,
            total: totals.total,
            delivery_method: draft.delivery_method,
            payment_method: draft.payment_method,
            shipping_address: draft.shipping_address,
            estimated_delivery: now + Duration::days(draft.delivery_method.transit_days()),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from storage. Totals are recomputed from the items
    /// and the stored shipping/tax so the sum invariant holds.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid, order_number: String, user_id: UserId, status: OrderStatus, items: Vec<OrderItem>,
        shipping_cost: Money, tax: Money, delivery_method: DeliveryMethod, payment_method: PaymentMethod,
        shipping_address: Address, estimated_delivery: DateTime<Utc>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
    ) -> Self {
        let subtotal = items.iter().map(|i| i.total).sum();
        Self {
            id, order_number, user_id, status, items, subtotal, shipping_cost, tax,
            total: subtotal + shipping_cost + tax, delivery_method, payment_method, shipping_address,
            estimated_delivery, created_at, updated_at,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> &UserId { &self.user_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn shipping_cost(&self) -> Money { self.shipping_cost }
    pub fn tax(&self) -> Money { self.tax }
    pub fn total(&self) -> Money { self.total }
    pub fn delivery_method(&self) -> DeliveryMethod { self.delivery_method }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn estimated_delivery(&self) -> DateTime<Utc> { self.estimated_delivery }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EcommerceError::InvalidTransition { from: self.status.to_string(), to: next.to_string() });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d%H%M%S"), suffix[..6].to_uppercase())
}
