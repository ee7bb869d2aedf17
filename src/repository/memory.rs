//! In-memory backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::domain::aggregates::{Address, Cart, CartLine, NewAddress, Order, Product};
use crate::domain::value_objects::{Money, UserId};
use crate::repository::{AddressBook, CartRepository, CatalogRepository, OrderRepository};
use crate::{EcommerceError, Result};

#[derive(Default)]
struct State {
    products: HashMap<String, Product>,
    carts: HashMap<UserId, Vec<CartLine>>,
    addresses: HashMap<UserId, Vec<Address>>,
    orders: Vec<Order>,
}

/// Volatile store for every repository trait. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = State { products: products.into_iter().map(|p| (p.id.clone(), p)).collect(), ..State::default() };
        Self { state: Arc::new(RwLock::new(state)) }
    }

    /// Loads a catalog from a JSON array of products.
    pub fn from_catalog_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| EcommerceError::StorageError(format!("{}: {e}", path.display())))?;
        let products: Vec<Product> = serde_json::from_str(&raw).map_err(|e| EcommerceError::StorageError(format!("{}: {e}", path.display())))?;
        Ok(Self::with_products(products))
    }

    pub async fn set_price(&self, product_id: &str, price: Money) -> Result<()> {
        let mut state = self.state.write().await;
        let product = state.products.get_mut(product_id).ok_or_else(|| EcommerceError::not_found(format!("product {product_id}")))?;
        product.base_price = price;
        Ok(())
    }

    pub async fn set_stock(&self, product_id: &str, variant_id: Option<&str>, stock: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let product = state.products.get_mut(product_id).ok_or_else(|| EcommerceError::not_found(format!("product {product_id}")))?;
        match variant_id {
            Some(variant_id) => {
                let variant = product.variants.iter_mut().find(|v| v.id == variant_id).ok_or_else(|| EcommerceError::not_found(format!("variant {variant_id}")))?;
                variant.stock_quantity = stock;
            }
            None => product.stock_quantity = stock,
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(product_id).cloned())
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn load_cart(&self, user_id: &UserId) -> Result<Cart> {
        let lines = self.state.read().await.carts.get(user_id).cloned().unwrap_or_default();
        Ok(Cart::from_lines(user_id.clone(), lines))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.state.write().await.carts.insert(cart.user_id().clone(), cart.lines().to_vec());
        Ok(())
    }

    async fn clear_cart(&self, user_id: &UserId) -> Result<()> {
        self.state.write().await.carts.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl AddressBook for MemoryStore {
    async fn list_addresses(&self, user_id: &UserId) -> Result<Vec<Address>> {
        Ok(self.state.read().await.addresses.get(user_id).cloned().unwrap_or_default())
    }

    async fn get_address(&self, user_id: &UserId, address_id: Uuid) -> Result<Option<Address>> {
        let state = self.state.read().await;
        Ok(state.addresses.get(user_id).and_then(|book| book.iter().find(|a| a.id == address_id).cloned()))
    }

    async fn create_address(&self, user_id: &UserId, address: NewAddress) -> Result<Address> {
        let mut state = self.state.write().await;
        let book = state.addresses.entry(user_id.clone()).or_default();
        let address = address.into_address(user_id.clone(), book.is_empty());
        book.push(address.clone());
        Ok(address)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn submit_order(&self, order: &Order) -> Result<Uuid> {
        let mut state = self.state.write().await;
        // Check every item before touching stock so a rejected order leaves the catalog as it was.
        for item in order.items() {
            let product = state.products.get(&item.product_id).ok_or_else(|| EcommerceError::not_found(format!("product {}", item.product_id)))?;
            let available = match item.variant_id.as_deref() {
                Some(id) => product.variant(id).map_or(0, |v| v.stock_quantity),
                None => product.stock_quantity,
            };
            if item.quantity > available {
                return Err(EcommerceError::OutOfStock { name: item.name.clone(), requested: item.quantity, available });
            }
        }
        for item in order.items() {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                match item.variant_id.as_deref() {
                    Some(id) => {
                        if let Some(variant) = product.variants.iter_mut().find(|v| v.id == id) {
                            variant.stock_quantity -= item.quantity;
                        }
                    }
                    None => product.stock_quantity -= item.quantity,
                }
            }
        }
        state.orders.push(order.clone());
        Ok(order.id())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.iter().find(|o| o.id() == order_id).cloned())
    }

    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state.orders.iter().filter(|o| o.user_id() == user_id).cloned().collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at()));
        Ok(orders)
    }

    async fn save_status(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.orders.iter_mut().find(|o| o.id() == order.id()).ok_or_else(|| EcommerceError::not_found(format!("order {}", order.id())))?;
        *stored = order.clone();
        Ok(())
    }
}
