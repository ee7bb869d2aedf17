//! Postgres backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::aggregates::{
    Address, Cart, CartLine, DeliveryMethod, NewAddress, Order, OrderItem, OrderStatus, PaymentMethod, Product, Variant,
    VariantSnapshot,
};
use crate::domain::value_objects::{Money, UserId};
use crate::repository::{AddressBook, CartRepository, CatalogRepository, OrderRepository};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| EcommerceError::StorageError(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn count(value: i32) -> u32 { u32::try_from(value).unwrap_or(0) }

fn column(value: u32) -> i32 { i32::try_from(value).unwrap_or(i32::MAX) }

#[derive(sqlx::FromRow)]
struct ProductRow { id: String, name: String, slug: String, base_price: i64, image: Option<String>, stock_quantity: i32, is_active: bool }

#[derive(sqlx::FromRow)]
struct VariantRow { id: String, name: String, price_adjustment: i64, stock_quantity: i32, is_active: bool }

#[derive(sqlx::FromRow)]
struct CartLineRow {
    id: Uuid, product_id: String, variant_id: Option<String>, quantity: i32, product_name: String, slug: String,
    base_price: i64, image: Option<String>, product_stock: i32, variant_name: Option<String>,
    variant_price_adjustment: Option<i64>, variant_stock: Option<i32>, added_at: DateTime<Utc>,
}

impl From<CartLineRow> for CartLine {
    fn from(r: CartLineRow) -> Self {
        let variant = r.variant_name.map(|name| VariantSnapshot {
            name,
            price_adjustment: Money::from_minor(r.variant_price_adjustment.unwrap_or(0)),
            stock: count(r.variant_stock.unwrap_or(0)),
        });
        CartLine {
            id: r.id, product_id: r.product_id, variant_id: r.variant_id, quantity: count(r.quantity),
            product_name: r.product_name, slug: r.slug, base_price: Money::from_minor(r.base_price), image: r.image,
            product_stock: count(r.product_stock), variant, added_at: r.added_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: Uuid, user_id: String, full_name: String, phone: String, line1: String, line2: Option<String>,
    city: String, state: String, postal_code: String, country: String, is_default: bool,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Address {
            id: r.id, user_id: UserId::new(r.user_id), full_name: r.full_name, phone: r.phone, line1: r.line1,
            line2: r.line2, city: r.city, state: r.state, postal_code: r.postal_code, country: r.country,
            is_default: r.is_default,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, user_id: String, status: String, shipping_cost: i64, tax: i64,
    delivery_method: String, payment_method: String, shipping_address: Json<Address>,
    estimated_delivery: DateTime<Utc>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid, product_id: String, variant_id: Option<String>, name: String, variant_name: Option<String>,
    quantity: i32, unit_price: i64, total: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| EcommerceError::StorageError(format!("unknown order status {:?}", self.status)))?;
        let payment = PaymentMethod::parse(&self.payment_method).ok_or_else(|| EcommerceError::StorageError(format!("unknown payment method {:?}", self.payment_method)))?;
        Ok(Order::restore(
            self.id, self.order_number, UserId::new(self.user_id), status, items,
            Money::from_minor(self.shipping_cost), Money::from_minor(self.tax),
            DeliveryMethod::from(self.delivery_method.as_str()), payment, self.shipping_address.0,
            self.estimated_delivery, self.created_at, self.updated_at,
        ))
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            product_id: r.product_id, variant_id: r.variant_id, name: r.name, variant_name: r.variant_name,
            quantity: count(r.quantity), unit_price: Money::from_minor(r.unit_price), total: Money::from_minor(r.total),
        }
    }
}

impl PgStore {
    async fn attach_items(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position")
            .bind(&ids).fetch_all(&self.pool).await?;
        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(OrderItem::from(item));
        }
        rows.into_iter()
            .map(|row| {
                let items = by_order.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect()
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        let Some(row) = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1").bind(product_id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let variants = sqlx::query_as::<_, VariantRow>("SELECT id, name, price_adjustment, stock_quantity, is_active FROM product_variants WHERE product_id = $1 ORDER BY id")
            .bind(product_id).fetch_all(&self.pool).await?;
        Ok(Some(Product {
            id: row.id, name: row.name, slug: row.slug, base_price: Money::from_minor(row.base_price), image: row.image,
            stock_quantity: count(row.stock_quantity), is_active: row.is_active,
            variants: variants.into_iter().map(|v| Variant {
                id: v.id, name: v.name, price_adjustment: Money::from_minor(v.price_adjustment),
                stock_quantity: count(v.stock_quantity), is_active: v.is_active,
            }).collect(),
        }))
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn load_cart(&self, user_id: &UserId) -> Result<Cart> {
        let rows = sqlx::query_as::<_, CartLineRow>("SELECT * FROM cart_lines WHERE user_id = $1 ORDER BY added_at, id")
            .bind(user_id.as_str()).fetch_all(&self.pool).await?;
        Ok(Cart::from_lines(user_id.clone(), rows.into_iter().map(CartLine::from).collect()))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1").bind(cart.user_id().as_str()).execute(&mut *tx).await?;
        for line in cart.lines() {
            sqlx::query("INSERT INTO cart_lines (id, user_id, product_id, variant_id, quantity, product_name, slug, base_price, image, product_stock, variant_name, variant_price_adjustment, variant_stock, added_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
                .bind(line.id).bind(cart.user_id().as_str()).bind(&line.product_id).bind(&line.variant_id)
                .bind(column(line.quantity)).bind(&line.product_name).bind(&line.slug).bind(line.base_price.minor())
                .bind(&line.image).bind(column(line.product_stock))
                .bind(line.variant.as_ref().map(|v| v.name.clone()))
                .bind(line.variant.as_ref().map(|v| v.price_adjustment.minor()))
                .bind(line.variant.as_ref().map(|v| column(v.stock)))
                .bind(line.added_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear_cart(&self, user_id: &UserId) -> Result<()> {
        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1").bind(user_id.as_str()).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AddressBook for PgStore {
    async fn list_addresses(&self, user_id: &UserId) -> Result<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses WHERE user_id = $1 ORDER BY is_default DESC, created_at")
            .bind(user_id.as_str()).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn get_address(&self, user_id: &UserId, address_id: Uuid) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses WHERE id = $1 AND user_id = $2")
            .bind(address_id).bind(user_id.as_str()).fetch_optional(&self.pool).await?;
        Ok(row.map(Address::from))
    }

    async fn create_address(&self, user_id: &UserId, address: NewAddress) -> Result<Address> {
        let mut tx = self.pool.begin().await?;
        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM addresses WHERE user_id = $1").bind(user_id.as_str()).fetch_one(&mut *tx).await?;
        let a = address.into_address(user_id.clone(), existing == 0);
        sqlx::query("INSERT INTO addresses (id, user_id, full_name, phone, line1, line2, city, state, postal_code, country, is_default) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
            .bind(a.id).bind(a.user_id.as_str()).bind(&a.full_name).bind(&a.phone).bind(&a.line1).bind(&a.line2)
            .bind(&a.city).bind(&a.state).bind(&a.postal_code).bind(&a.country).bind(a.is_default)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(a)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn submit_order(&self, order: &Order) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        for item in order.items() {
            let taken = match &item.variant_id {
                Some(variant_id) => sqlx::query("UPDATE product_variants SET stock_quantity = stock_quantity - $3 WHERE product_id = $1 AND id = $2 AND stock_quantity >= $3")
                    .bind(&item.product_id).bind(variant_id).bind(column(item.quantity)).execute(&mut *tx).await?,
                None => sqlx::query("UPDATE products SET stock_quantity = stock_quantity - $2 WHERE id = $1 AND stock_quantity >= $2")
                    .bind(&item.product_id).bind(column(item.quantity)).execute(&mut *tx).await?,
            };
            if taken.rows_affected() == 0 {
                // Dropping the transaction rolls back stock already taken for earlier items.
                let available = match self.get_product(&item.product_id).await? {
                    Some(p) => match item.variant_id.as_deref() {
                        Some(id) => p.variant(id).map_or(0, |v| v.stock_quantity),
                        None => p.stock_quantity,
                    },
                    None => 0,
                };
                return Err(EcommerceError::OutOfStock { name: item.name.clone(), requested: item.quantity, available });
            }
        }
        sqlx::query("INSERT INTO orders (id, order_number, user_id, status, subtotal, shipping_cost, tax, total, delivery_method, payment_method, shipping_address, estimated_delivery, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
            .bind(order.id()).bind(order.order_number()).bind(order.user_id().as_str()).bind(order.status().as_str())
            .bind(order.subtotal().minor()).bind(order.shipping_cost().minor()).bind(order.tax().minor()).bind(order.total().minor())
            .bind(order.delivery_method().as_str()).bind(order.payment_method().as_str()).bind(Json(order.shipping_address()))
            .bind(order.estimated_delivery()).bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *tx).await?;
        for (position, item) in order.items().iter().enumerate() {
            sqlx::query("INSERT INTO order_items (order_id, position, product_id, variant_id, name, variant_name, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
                .bind(order.id()).bind(i32::try_from(position).unwrap_or(i32::MAX)).bind(&item.product_id).bind(&item.variant_id)
                .bind(&item.name).bind(&item.variant_name).bind(column(item.quantity)).bind(item.unit_price.minor()).bind(item.total.minor())
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(order.id())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(&self.pool).await?;
        Ok(self.attach_items(row.into_iter().collect()).await?.pop())
    }

    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id.as_str()).fetch_all(&self.pool).await?;
        self.attach_items(rows).await
    }

    async fn save_status(&self, order: &Order) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id()).bind(order.status().as_str()).bind(order.updated_at()).execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(EcommerceError::not_found(format!("order {}", order.id()))); }
        Ok(())
    }
}
