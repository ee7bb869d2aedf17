//! Placed orders: lookup and status lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::UserId;
use crate::publisher::EventPublisher;
use crate::repository::OrderRepository;
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventPublisher>,
    staff: Arc<HashSet<UserId>>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepository>, events: Arc<dyn EventPublisher>) -> Self {
        Self { orders, events, staff: Arc::new(HashSet::new()) }
    }

    /// Users allowed to move any order through fulfilment.
    pub fn with_staff(mut self, staff: impl IntoIterator<Item = UserId>) -> Self {
        self.staff = Arc::new(staff.into_iter().collect());
        self
    }

    /// A customer's own order. Someone else's order reads as not found.
    pub async fn get_order(&self, user_id: &UserId, order_id: Uuid) -> Result<Order> {
        self.orders.get_order(order_id).await?
            .filter(|o| o.user_id() == user_id)
            .ok_or_else(|| EcommerceError::not_found(format!("order {order_id}")))
    }

    pub async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        self.orders.list_orders(user_id).await
    }

    /// Staff may apply any legal transition. A customer may only cancel one of
    /// their own orders; other customers' orders read as not found.
    #[instrument(skip(self))]
    pub async fn update_status(&self, actor: &UserId, order_id: Uuid, next: OrderStatus) -> Result<Order> {
        let mut order = self.orders.get_order(order_id).await?.ok_or_else(|| EcommerceError::not_found(format!("order {order_id}")))?;
        if !self.staff.contains(actor) {
            if order.user_id() != actor {
                return Err(EcommerceError::not_found(format!("order {order_id}")));
            }
            if next != OrderStatus::Cancelled {
                return Err(EcommerceError::Forbidden(format!("customers cannot mark orders {next}")));
            }
        }
        let from = order.status();
        order.transition_to(next)?;
        self.orders.save_status(&order).await?;
        info!(order_number = order.order_number(), %from, to = %next, "order status changed");
        if let Err(e) = self.events.publish(&DomainEvent::OrderStatusChanged { order_id, from, to: next }).await {
            warn!(error = %e, "status change not published");
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::address::tests::lagos;
    use crate::domain::aggregates::cart::tests::product;
    use crate::domain::aggregates::{Cart, DeliveryMethod, OrderDraft, PaymentMethod};
    use crate::domain::value_objects::TaxRate;
    use crate::publisher::RecordingPublisher;
    use crate::repository::MemoryStore;

    async fn placed(store: &MemoryStore, user: &str) -> Order {
        let user = UserId::from(user);
        let mut cart = Cart::new(user.clone());
        cart.add_item(&product("p1", 1_000, 10), None, 1).unwrap();
        let draft = OrderDraft {
            user_id: user.clone(),
            shipping_address: lagos().into_address(user, true),
            delivery_method: DeliveryMethod::Express,
            payment_method: PaymentMethod::Paypal,
            tax_rate: TaxRate::default(),
        };
        let order = Order::assemble(cart.lines(), draft, chrono::Utc::now()).unwrap();
        store.submit_order(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = MemoryStore::with_products([product("p1", 1_000, 10)]);
        let events = Arc::new(RecordingPublisher::default());
        let service = OrderService::new(Arc::new(store.clone()), events.clone()).with_staff([UserId::from("ops")]);
        let order = placed(&store, "u1").await;
        let ops = UserId::from("ops");

        service.update_status(&ops, order.id(), OrderStatus::Processing).await.unwrap();
        let err = service.update_status(&ops, order.id(), OrderStatus::Delivered).await.unwrap_err();
        assert_eq!(err, EcommerceError::InvalidTransition { from: "processing".into(), to: "delivered".into() });
        service.update_status(&ops, order.id(), OrderStatus::Cancelled).await.unwrap();

        let stored = service.get_order(&UserId::from("u1"), order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        assert_eq!(events.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_customers_may_only_cancel_their_own_orders() {
        let store = MemoryStore::with_products([product("p1", 1_000, 10)]);
        let events = Arc::new(RecordingPublisher::default());
        let service = OrderService::new(Arc::new(store.clone()), events.clone()).with_staff([UserId::from("ops")]);
        let order = placed(&store, "u1").await;

        let err = service.update_status(&UserId::from("u2"), order.id(), OrderStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, EcommerceError::NotFound(_)));
        let err = service.update_status(&UserId::from("u1"), order.id(), OrderStatus::Shipped).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Forbidden(_)));
        assert_eq!(store.get_order(order.id()).await.unwrap().unwrap().status(), OrderStatus::Pending);
        assert!(events.events.lock().unwrap().is_empty());

        let cancelled = service.update_status(&UserId::from("u1"), order.id(), OrderStatus::Cancelled).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_orders_are_private_to_their_owner() {
        let store = MemoryStore::with_products([product("p1", 1_000, 10)]);
        let service = OrderService::new(Arc::new(store.clone()), Arc::new(RecordingPublisher::default()));
        let order = placed(&store, "u1").await;
        placed(&store, "u1").await;
        assert!(matches!(service.get_order(&UserId::from("u2"), order.id()).await, Err(EcommerceError::NotFound(_))));
        assert_eq!(service.list_orders(&UserId::from("u1")).await.unwrap().len(), 2);
        assert!(service.list_orders(&UserId::from("u2")).await.unwrap().is_empty());
    }
}
