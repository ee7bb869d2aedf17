//! Order assembly: turns a cart snapshot plus checkout choices into a
//! committed order.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use crate::domain::aggregates::{Address, AddressSelection, CartLine, DeliveryMethod, Order, OrderDraft, PaymentMethod};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{TaxRate, UserId};
use crate::publisher::EventPublisher;
use crate::repository::{AddressBook, CatalogRepository, OrderRepository};
use crate::services::ledger::CartSession;
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutRequest {
    pub address: AddressSelection,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

pub struct OrderAssembler {
    catalog: Arc<dyn CatalogRepository>,
    addresses: Arc<dyn AddressBook>,
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventPublisher>,
    tax_rate: TaxRate,
}

impl OrderAssembler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        addresses: Arc<dyn AddressBook>,
        orders: Arc<dyn OrderRepository>,
        events: Arc<dyn EventPublisher>,
        tax_rate: TaxRate,
    ) -> Self {
        Self { catalog, addresses, orders, events, tax_rate }
    }

    /// Places an order for everything in the session's cart.
    ///
    /// Checkouts for one identity run one at a time; a second one sees the
    /// cart the first left behind. Ordered quantities leave the cart only once
    /// the order repository has accepted the order, so a failed call can
    /// simply be retried. Lines added while the order was being placed stay.
    #[instrument(skip(self, cart, request), fields(user_id = %cart.user_id(), delivery = request.delivery_method.as_str()))]
    pub async fn place_order(&self, cart: &CartSession, request: CheckoutRequest) -> Result<Order> {
        let _checkout = cart.checkout_lock().await;
        let lines = cart.lines().await?;
        let order = self.submit(cart.user_id(), &lines, request).await?;
        let ordered = lines.iter().map(|l| (l.id, l.quantity)).collect();
        if let Err(e) = cart.settle(ordered).await {
            warn!(order_number = order.order_number(), error = %e, "order placed but cart not settled");
        }
        if let Err(e) = self.events.publish(&DomainEvent::placed(&order)).await {
            warn!(order_number = order.order_number(), error = %e, "order placed but event not published");
        }
        Ok(order)
    }

    /// Validates, prices and commits `lines` without touching the cart.
    pub async fn submit(&self, user_id: &UserId, lines: &[CartLine], request: CheckoutRequest) -> Result<Order> {
        if lines.is_empty() { return Err(EcommerceError::EmptyCart); }
        let selection = match request.address {
            AddressSelection::New { address } => AddressSelection::New { address: address.validated()? },
            saved => saved,
        };
        self.check_stock(lines).await?;
        let shipping_address = self.resolve_address(user_id, selection).await?;
        let draft = OrderDraft {
            user_id: user_id.clone(),
            shipping_address,
            delivery_method: request.delivery_method,
            payment_method: request.payment_method,
            tax_rate: self.tax_rate,
        };
        let order = Order::assemble(lines, draft, Utc::now())?;
        self.orders.submit_order(&order).await?;
        info!(order_number = order.order_number(), total = %order.total(), items = order.items().len(), "order placed");
        Ok(order)
    }

    async fn check_stock(&self, lines: &[CartLine]) -> Result<()> {
        for line in lines {
            let product = self.catalog.get_product(&line.product_id).await?.filter(|p| p.is_active);
            let available = match (&product, line.variant_id.as_deref()) {
                (Some(p), Some(id)) => p.variant(id).filter(|v| v.is_active).map_or(0, |v| v.stock_quantity),
                (Some(p), None) => p.stock_quantity,
                (None, _) => 0,
            };
            if line.quantity > available {
                return Err(EcommerceError::OutOfStock { name: line.product_name.clone(), requested: line.quantity, available });
            }
        }
        Ok(())
    }

    async fn resolve_address(&self, user_id: &UserId, selection: AddressSelection) -> Result<Address> {
        match selection {
            AddressSelection::Saved { id } => self.addresses.get_address(user_id, id).await?.ok_or_else(|| EcommerceError::not_found(format!("address {id}"))),
            AddressSelection::New { address } => self.addresses.create_address(user_id, address).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::address::tests::lagos;
    use crate::domain::aggregates::cart::tests::product;
    use crate::domain::aggregates::{NewAddress, OrderStatus};
    use crate::domain::value_objects::Money;
    use crate::publisher::RecordingPublisher;
    use crate::domain::aggregates::Cart;
    use crate::repository::{CartRepository, MemoryStore, MockOrderRepository, SessionIdentity};
    use crate::services::ledger::CartLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: MemoryStore,
        cart: CartSession,
        assembler: OrderAssembler,
        events: Arc<RecordingPublisher>,
    }

    /// Catalog, carts and addresses live in one store; `sink` replaces it as the order repository.
    async fn fixture_with(sink: Option<Arc<dyn OrderRepository>>) -> Fixture {
        let store = MemoryStore::with_products([product("p1", 2_000, 5), product("p2", 1_000, 10)]);
        let ledger = CartLedger::new(Arc::new(store.clone()), Arc::new(store.clone()), 16);
        let cart = ledger.session(&SessionIdentity::signed_in("u1")).await.unwrap();
        let events = Arc::new(RecordingPublisher::default());
        let orders: Arc<dyn OrderRepository> = match sink {
            Some(sink) => sink,
            None => Arc::new(store.clone()),
        };
        let assembler = OrderAssembler::new(Arc::new(store.clone()), Arc::new(store.clone()), orders, events.clone(), TaxRate::default());
        Fixture { store, cart, assembler, events }
    }

    async fn fixture() -> Fixture { fixture_with(None).await }

    fn request(delivery: DeliveryMethod) -> CheckoutRequest {
        CheckoutRequest { address: AddressSelection::New { address: lagos() }, delivery_method: delivery, payment_method: PaymentMethod::Card }
    }

    #[tokio::test]
    async fn test_checkout_end_to_end() {
        let f = fixture().await;
        f.cart.add_to_cart("p1", None, 1).await.unwrap();
        f.cart.add_to_cart("p1", None, 2).await.unwrap();

        let order = f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)).await.unwrap();
        assert_eq!(order.subtotal(), Money::from_major(60));
        assert_eq!(order.shipping_cost(), Money::from_major(5));
        assert_eq!(order.tax(), Money::from_minor(480));
        assert_eq!(order.total(), Money::from_minor(6_980));
        assert_eq!(order.status(), OrderStatus::Pending);

        assert!(f.cart.lines().await.unwrap().is_empty());
        assert_eq!(f.cart.snapshot().total_items, 0);
        assert_eq!(f.store.get_product("p1").await.unwrap().unwrap().stock_quantity, 2);
        assert_eq!(f.store.list_addresses(&UserId::from("u1")).await.unwrap().len(), 1);
        assert!(matches!(f.events.events.lock().unwrap().as_slice(), [DomainEvent::OrderPlaced(e)] if e.order_number == order.order_number()));
    }

    #[tokio::test]
    async fn test_empty_cart_never_reaches_sink() {
        let mut sink = MockOrderRepository::new();
        sink.expect_submit_order().never();
        let f = fixture_with(Some(Arc::new(sink) as Arc<dyn OrderRepository>)).await;
        let err = f.assembler.place_order(&f.cart, request(DeliveryMethod::Express)).await.unwrap_err();
        assert_eq!(err, EcommerceError::EmptyCart);
        assert!(f.store.list_addresses(&UserId::from("u1")).await.unwrap().is_empty());
        assert!(f.events.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_keeps_cart() {
        let mut sink = MockOrderRepository::new();
        sink.expect_submit_order().never();
        let f = fixture_with(Some(Arc::new(sink) as Arc<dyn OrderRepository>)).await;
        f.cart.add_to_cart("p1", None, 1).await.unwrap();
        let bad = CheckoutRequest {
            address: AddressSelection::New { address: NewAddress { city: String::new(), ..lagos() } },
            delivery_method: DeliveryMethod::Standard,
            payment_method: PaymentMethod::Card,
        };
        let err = f.assembler.place_order(&f.cart, bad).await.unwrap_err();
        assert_eq!(err, EcommerceError::InvalidAddress(vec!["city".into()]));
        assert_eq!(f.cart.lines().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_saved_address() {
        let f = fixture().await;
        f.cart.add_to_cart("p1", None, 1).await.unwrap();
        let req = CheckoutRequest { address: AddressSelection::Saved { id: Uuid::now_v7() }, ..request(DeliveryMethod::Standard) };
        assert!(matches!(f.assembler.place_order(&f.cart, req).await, Err(EcommerceError::NotFound(_))));
        assert_eq!(f.cart.lines().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_saved_address_is_reused() {
        let f = fixture().await;
        let saved = f.store.create_address(&UserId::from("u1"), lagos()).await.unwrap();
        f.cart.add_to_cart("p2", None, 1).await.unwrap();
        let req = CheckoutRequest { address: AddressSelection::Saved { id: saved.id }, ..request(DeliveryMethod::Overnight) };
        let order = f.assembler.place_order(&f.cart, req).await.unwrap();
        assert_eq!(order.shipping_address(), &saved);
        assert_eq!(order.shipping_cost(), Money::from_major(30));
        assert_eq!(f.store.list_addresses(&UserId::from("u1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_stock_rejected_at_commit() {
        let f = fixture().await;
        f.cart.add_to_cart("p1", None, 4).await.unwrap();
        f.store.set_stock("p1", None, 3).await.unwrap();
        let err = f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)).await.unwrap_err();
        assert_eq!(err, EcommerceError::OutOfStock { name: "Product p1".into(), requested: 4, available: 3 });
        assert_eq!(f.cart.lines().await.unwrap().len(), 1);
        assert!(f.store.list_addresses(&UserId::from("u1")).await.unwrap().is_empty());
    }

    struct FlakySink {
        inner: MemoryStore,
        failures: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl OrderRepository for FlakySink {
        async fn submit_order(&self, order: &Order) -> Result<Uuid> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(EcommerceError::StorageError("connection reset".into()));
                }
            }
            self.inner.submit_order(order).await
        }
        async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> { self.inner.get_order(order_id).await }
        async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> { self.inner.list_orders(user_id).await }
        async fn save_status(&self, order: &Order) -> Result<()> { self.inner.save_status(order).await }
    }

    #[tokio::test]
    async fn test_failed_submission_keeps_cart_and_retry_succeeds() {
        let store = MemoryStore::with_products([product("p1", 2_000, 5)]);
        let sink = Arc::new(FlakySink { inner: store.clone(), failures: std::sync::Mutex::new(1) });
        let ledger = CartLedger::new(Arc::new(store.clone()), Arc::new(store.clone()), 16);
        let cart = ledger.session(&SessionIdentity::signed_in("u1")).await.unwrap();
        let assembler = OrderAssembler::new(Arc::new(store.clone()), Arc::new(store.clone()), sink.clone(), Arc::new(RecordingPublisher::default()), TaxRate::default());
        cart.add_to_cart("p1", None, 2).await.unwrap();

        let err = assembler.place_order(&cart, request(DeliveryMethod::Express)).await.unwrap_err();
        assert!(matches!(err, EcommerceError::StorageError(_)));
        assert_eq!(cart.lines().await.unwrap().len(), 1);

        let order = assembler.place_order(&cart, request(DeliveryMethod::Express)).await.unwrap();
        assert_eq!(order.total(), Money::from_major(40) + Money::from_major(15) + Money::from_minor(320));
        assert!(cart.lines().await.unwrap().is_empty());
        assert_eq!(store.list_orders(&UserId::from("u1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_price_change_does_not_touch_placed_order() {
        let f = fixture().await;
        f.cart.add_to_cart("p2", None, 3).await.unwrap();
        let order = f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)).await.unwrap();
        f.store.set_price("p2", Money::from_major(99)).await.unwrap();
        let stored = f.store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.items()[0].unit_price, Money::from_major(10));
        assert_eq!(stored.subtotal(), Money::from_major(30));
    }

    /// Commits to the store after a pause, leaving room for requests to overlap.
    struct SlowSink {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl OrderRepository for SlowSink {
        async fn submit_order(&self, order: &Order) -> Result<Uuid> {
            tokio::time::sleep(self.delay).await;
            self.inner.submit_order(order).await
        }
        async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> { self.inner.get_order(order_id).await }
        async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> { self.inner.list_orders(user_id).await }
        async fn save_status(&self, order: &Order) -> Result<()> { self.inner.save_status(order).await }
    }

    fn slow(f: &Fixture) -> Arc<dyn OrderRepository> {
        Arc::new(SlowSink { inner: f.store.clone(), delay: Duration::from_millis(60) })
    }

    #[tokio::test]
    async fn test_double_submit_places_one_order() {
        let base = fixture().await;
        let f = Fixture { assembler: OrderAssembler::new(Arc::new(base.store.clone()), Arc::new(base.store.clone()), slow(&base), base.events.clone(), TaxRate::default()), ..base };
        f.cart.add_to_cart("p1", None, 2).await.unwrap();

        let (first, second) = tokio::join!(
            f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)),
            f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(EcommerceError::EmptyCart))));
        assert_eq!(f.store.list_orders(&UserId::from("u1")).await.unwrap().len(), 1);
        assert_eq!(f.store.get_product("p1").await.unwrap().unwrap().stock_quantity, 3);
    }

    #[tokio::test]
    async fn test_lines_added_during_checkout_survive() {
        let base = fixture().await;
        let f = Fixture { assembler: OrderAssembler::new(Arc::new(base.store.clone()), Arc::new(base.store.clone()), slow(&base), base.events.clone(), TaxRate::default()), ..base };
        f.cart.add_to_cart("p1", None, 2).await.unwrap();

        let (order, _) = tokio::join!(
            f.assembler.place_order(&f.cart, request(DeliveryMethod::Standard)),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.cart.add_to_cart("p2", None, 1).await.unwrap();
                f.cart.add_to_cart("p1", None, 1).await.unwrap();
            },
        );
        let order = order.unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].quantity, 2);

        let mut left: Vec<(String, u32)> = f.cart.lines().await.unwrap().into_iter().map(|l| (l.product_id, l.quantity)).collect();
        left.sort();
        assert_eq!(left, vec![("p1".to_string(), 1), ("p2".to_string(), 1)]);
    }

    /// Order storage works; cart writes start failing once an order lands.
    struct BrokenAfterSubmit {
        inner: MemoryStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl CartRepository for BrokenAfterSubmit {
        async fn load_cart(&self, user_id: &UserId) -> Result<Cart> { self.inner.load_cart(user_id).await }
        async fn save_cart(&self, cart: &Cart) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(EcommerceError::StorageError("cart store offline".into()));
            }
            self.inner.save_cart(cart).await
        }
        async fn clear_cart(&self, user_id: &UserId) -> Result<()> { self.inner.clear_cart(user_id).await }
    }

    #[async_trait]
    impl OrderRepository for BrokenAfterSubmit {
        async fn submit_order(&self, order: &Order) -> Result<Uuid> {
            let id = self.inner.submit_order(order).await?;
            self.broken.store(true, Ordering::SeqCst);
            Ok(id)
        }
        async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> { self.inner.get_order(order_id).await }
        async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> { self.inner.list_orders(user_id).await }
        async fn save_status(&self, order: &Order) -> Result<()> { self.inner.save_status(order).await }
    }

    #[tokio::test]
    async fn test_committed_order_returned_when_cart_update_fails() {
        let store = MemoryStore::with_products([product("p1", 2_000, 5)]);
        let backend = Arc::new(BrokenAfterSubmit { inner: store.clone(), broken: AtomicBool::new(false) });
        let ledger = CartLedger::new(Arc::new(store.clone()), backend.clone(), 16);
        let cart = ledger.session(&SessionIdentity::signed_in("u1")).await.unwrap();
        let assembler = OrderAssembler::new(Arc::new(store.clone()), Arc::new(store.clone()), backend.clone(), Arc::new(RecordingPublisher::default()), TaxRate::default());
        cart.add_to_cart("p1", None, 1).await.unwrap();

        let order = assembler.place_order(&cart, request(DeliveryMethod::Standard)).await.unwrap();
        assert_eq!(store.get_order(order.id()).await.unwrap().map(|o| o.id()), Some(order.id()));
        assert_eq!(store.list_orders(&UserId::from("u1")).await.unwrap().len(), 1);
    }
}
