//! Domain events
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::value_objects::{Money, UserId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced(OrderEvent),
    OrderStatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub user_id: UserId,
    pub total: Money,
    pub item_count: u32,
}

impl DomainEvent {
    pub fn placed(order: &Order) -> Self {
        Self::OrderPlaced(OrderEvent {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            user_id: order.user_id().clone(),
            total: order.total(),
            item_count: order.items().iter().map(|i| i.quantity).sum(),
        })
    }

    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderPlaced(_) => "storefront.orders.placed",
            Self::OrderStatusChanged { .. } => "storefront.orders.status_changed",
        }
    }
}
