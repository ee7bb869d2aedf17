//! Cart ledger.
//!
//! Every identity gets one worker task that owns its mutation queue. The
//! worker re-reads the stored cart before applying each request, so two rapid
//! "+1" clicks always compose instead of both writing the same quantity.
//! Consecutive quantity updates for the same line are coalesced: only the last
//! one is applied and every caller in the run gets its result.
//!
//! The registry only keeps weak senders. A worker stops, and drops out of the
//! registry, once the last session for its identity is gone.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartLine, QuantityChange};
use crate::domain::value_objects::{Money, UserId};
use crate::repository::{CartRepository, CatalogRepository, Identity};
use crate::{EcommerceError, Result};

/// Observable cart state for one identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CartSnapshot {
    pub items: Vec<CartLine>,
    pub total_items: u32,
    pub subtotal: Money,
    pub loading: bool,
}

impl CartSnapshot {
    fn of(cart: &Cart) -> Self {
        Self { items: cart.lines().to_vec(), total_items: cart.total_items(), subtotal: cart.subtotal(), loading: false }
    }
}

#[derive(Debug)]
enum Command {
    Add { product_id: String, variant_id: Option<String>, quantity: u32 },
    SetQuantity { line_id: Uuid, quantity: i64 },
    Remove { line_id: Uuid },
    Clear,
    Settle { ordered: Vec<(Uuid, u32)> },
    Read,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::SetQuantity { .. } => "set_quantity",
            Self::Remove { .. } => "remove",
            Self::Clear => "clear",
            Self::Settle { .. } => "settle",
            Self::Read => "read",
        }
    }

    /// Whether `next` makes this request pointless if it is applied right after.
    fn superseded_by(&self, next: &Command) -> bool {
        matches!((self, next), (Command::SetQuantity { line_id: a, .. }, Command::SetQuantity { line_id: b, .. }) if a == b)
    }
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<CartSnapshot>>,
}

#[derive(Clone)]
struct Worker {
    tx: mpsc::Sender<Envelope>,
    state: watch::Receiver<CartSnapshot>,
    checkout: Arc<Mutex<()>>,
}

struct Slot {
    tx: mpsc::WeakSender<Envelope>,
    state: watch::Receiver<CartSnapshot>,
    checkout: Arc<Mutex<()>>,
}

impl Slot {
    fn upgrade(&self) -> Option<Worker> {
        let tx = self.tx.upgrade()?;
        Some(Worker { tx, state: self.state.clone(), checkout: self.checkout.clone() })
    }
}

type Registry = Arc<Mutex<HashMap<UserId, Slot>>>;

/// Shared entry point. Cheap to clone.
#[derive(Clone)]
pub struct CartLedger {
    catalog: Arc<dyn CatalogRepository>,
    carts: Arc<dyn CartRepository>,
    workers: Registry,
    queue_depth: usize,
}

impl CartLedger {
    pub fn new(catalog: Arc<dyn CatalogRepository>, carts: Arc<dyn CartRepository>, queue_depth: usize) -> Self {
        Self { catalog, carts, workers: Arc::new(Mutex::new(HashMap::new())), queue_depth: queue_depth.max(1) }
    }

    /// Opens the cart of whoever `identity` says is signed in.
    pub async fn session(&self, identity: &dyn Identity) -> Result<CartSession> {
        let user_id = identity.current_user_id().ok_or(EcommerceError::Unauthenticated)?;
        if let Some(worker) = self.workers.lock().await.get(&user_id).and_then(Slot::upgrade) {
            return Ok(CartSession { user_id, worker });
        }
        // Loaded outside the registry lock; other identities never wait on this read.
        let initial = CartSnapshot::of(&self.carts.load_cart(&user_id).await?);
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get(&user_id).and_then(Slot::upgrade) {
            return Ok(CartSession { user_id, worker });
        }
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let (state_tx, state_rx) = watch::channel(initial);
        let runner = LedgerWorker {
            user_id: user_id.clone(),
            catalog: self.catalog.clone(),
            carts: self.carts.clone(),
            state: state_tx,
            registry: self.workers.clone(),
        };
        tokio::spawn(runner.run(rx));
        debug!(user_id = %user_id, "cart worker started");
        let worker = Worker { tx, state: state_rx, checkout: Arc::new(Mutex::new(())) };
        workers.insert(
            user_id.clone(),
            Slot { tx: worker.tx.downgrade(), state: worker.state.clone(), checkout: worker.checkout.clone() },
        );
        Ok(CartSession { user_id, worker })
    }

    /// Identities that currently have a running worker.
    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }
}

/// A signed-in identity's handle on its cart.
#[derive(Clone)]
pub struct CartSession {
    user_id: UserId,
    worker: Worker,
}

impl CartSession {
    pub fn user_id(&self) -> &UserId { &self.user_id }

    pub async fn add_to_cart(&self, product_id: impl Into<String>, variant_id: Option<String>, quantity: u32) -> Result<CartSnapshot> {
        self.send(Command::Add { product_id: product_id.into(), variant_id, quantity }).await
    }

    pub async fn update_quantity(&self, line_id: Uuid, quantity: i64) -> Result<CartSnapshot> {
        self.send(Command::SetQuantity { line_id, quantity }).await
    }

    pub async fn remove_from_cart(&self, line_id: Uuid) -> Result<CartSnapshot> {
        self.send(Command::Remove { line_id }).await
    }

    pub async fn clear_cart(&self) -> Result<CartSnapshot> {
        self.send(Command::Clear).await
    }

    /// Current cart, after every request issued before this one.
    pub async fn current(&self) -> Result<CartSnapshot> {
        self.send(Command::Read).await
    }

    pub async fn lines(&self) -> Result<Vec<CartLine>> {
        Ok(self.current().await?.items)
    }

    /// Last published state; may still be `loading`.
    pub fn snapshot(&self) -> CartSnapshot { self.worker.state.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> { self.worker.state.clone() }

    /// Held for a whole checkout, so one identity never has two in flight.
    pub(crate) async fn checkout_lock(&self) -> OwnedMutexGuard<()> {
        self.worker.checkout.clone().lock_owned().await
    }

    /// Takes ordered `(line, quantity)` pairs out of the cart. Lines added, or
    /// quantity raised, after the order snapshot stay in the cart.
    pub(crate) async fn settle(&self, ordered: Vec<(Uuid, u32)>) -> Result<CartSnapshot> {
        self.send(Command::Settle { ordered }).await
    }

    async fn send(&self, command: Command) -> Result<CartSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.worker.tx.send(Envelope { command, reply }).await.map_err(|_| EcommerceError::LedgerUnavailable)?;
        rx.await.map_err(|_| EcommerceError::LedgerUnavailable)?
    }
}

struct LedgerWorker {
    user_id: UserId,
    catalog: Arc<dyn CatalogRepository>,
    carts: Arc<dyn CartRepository>,
    state: watch::Sender<CartSnapshot>,
    registry: Registry,
}

impl LedgerWorker {
    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        let mut backlog: VecDeque<Envelope> = VecDeque::new();
        loop {
            if backlog.is_empty() {
                match rx.recv().await {
                    Some(envelope) => backlog.push_back(envelope),
                    None => break,
                }
            }
            while let Ok(envelope) = rx.try_recv() {
                backlog.push_back(envelope);
            }
            let Some(mut current) = backlog.pop_front() else { continue };
            let mut waiting = Vec::new();
            while backlog.front().is_some_and(|next| current.command.superseded_by(&next.command)) {
                let Some(next) = backlog.pop_front() else { break };
                debug!(user_id = %self.user_id, "coalescing superseded quantity update");
                waiting.push(std::mem::replace(&mut current, next).reply);
            }
            waiting.push(current.reply);
            let result = self.apply(current.command).await;
            for reply in waiting {
                // The caller may have gone away; nothing to do then.
                let _ = reply.send(result.clone());
            }
        }
        let mut workers = self.registry.lock().await;
        // A newer worker may already own the slot.
        if workers.get(&self.user_id).is_some_and(|slot| slot.tx.upgrade().is_none()) {
            workers.remove(&self.user_id);
        }
        debug!(user_id = %self.user_id, "cart worker stopped");
    }

    #[instrument(skip(self, command), fields(user_id = %self.user_id, op = command.name()))]
    async fn apply(&self, command: Command) -> Result<CartSnapshot> {
        if matches!(command, Command::Read) {
            let cart = self.carts.load_cart(&self.user_id).await?;
            return Ok(CartSnapshot::of(&cart));
        }
        self.state.send_modify(|s| s.loading = true);
        let outcome = self.mutate(command).await;
        match &outcome {
            Ok(snapshot) => { self.state.send_replace(snapshot.clone()); }
            Err(e) => {
                warn!(error = %e, "cart mutation rejected");
                self.state.send_modify(|s| s.loading = false);
            }
        }
        outcome
    }

    async fn mutate(&self, command: Command) -> Result<CartSnapshot> {
        let mut cart = self.carts.load_cart(&self.user_id).await?;
        match command {
            Command::Add { product_id, variant_id, quantity } => {
                let product = self.catalog.get_product(&product_id).await?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| EcommerceError::not_found(format!("product {product_id}")))?;
                let variant = match variant_id.as_deref() {
                    Some(id) => Some(
                        self.catalog.get_variant(&product_id, id).await?
                            .filter(|v| v.is_active)
                            .ok_or_else(|| EcommerceError::not_found(format!("variant {id}")))?,
                    ),
                    None => None,
                };
                let line = cart.add_item(&product, variant.as_ref(), quantity)?;
                info!(product_id = %line.product_id, line_id = %line.id, quantity = line.quantity, "added to cart");
            }
            Command::SetQuantity { line_id, quantity } => {
                let available = match cart.line(line_id) {
                    Some(line) if quantity >= 1 => self.live_stock(line).await?,
                    _ => 0,
                };
                match cart.update_quantity(line_id, quantity, available)? {
                    QuantityChange::Updated(q) => info!(line_id = %line_id, quantity = q, "quantity updated"),
                    QuantityChange::Removed => info!(line_id = %line_id, "line removed by quantity update"),
                }
            }
            Command::Remove { line_id } => {
                if !cart.remove_item(line_id) {
                    debug!(line_id = %line_id, "remove of absent line ignored");
                    return Ok(CartSnapshot::of(&cart));
                }
                info!(line_id = %line_id, "removed from cart");
            }
            Command::Clear => {
                self.carts.clear_cart(&self.user_id).await?;
                info!("cart cleared");
                return Ok(CartSnapshot::default());
            }
            Command::Settle { ordered } => {
                cart.settle(&ordered);
                info!(lines = ordered.len(), remaining = cart.lines().len(), "ordered lines settled");
            }
            Command::Read => {}
        }
        self.carts.save_cart(&cart).await?;
        Ok(CartSnapshot::of(&cart))
    }

    async fn live_stock(&self, line: &CartLine) -> Result<u32> {
        let product = self.catalog.get_product(&line.product_id).await?
            .filter(|p| p.is_active)
            .ok_or_else(|| EcommerceError::not_found(format!("product {}", line.product_id)))?;
        match line.variant_id.as_deref() {
            Some(id) => product.variant(id).filter(|v| v.is_active).map(|v| v.stock_quantity).ok_or_else(|| EcommerceError::not_found(format!("variant {id}"))),
            None => Ok(product.stock_quantity),
        }
    }
}
