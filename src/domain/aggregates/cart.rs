//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::product::{Product, Variant};
use crate::domain::value_objects::{Money, UserId};
use crate::{EcommerceError, Result};

/// One customer's cart. Totals are derived from the lines on every read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    lines: Vec<CartLine>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub product_name: String,
    pub slug: String,
    pub base_price: Money,
    pub image: Option<String>,
    pub product_stock: u32,
    pub variant: Option<VariantSnapshot>,
    pub added_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub name: String,
    pub price_adjustment: Money,
    pub stock: u32,
}

impl CartLine {
    fn snapshot(product: &Product, variant: Option<&Variant>, quantity: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            product_id: product.id.clone(),
            variant_id: variant.map(|v| v.id.clone()),
            quantity,
            product_name: product.name.clone(),
            slug: product.slug.clone(),
            base_price: product.base_price,
            image: product.image.clone(),
            product_stock: product.stock_quantity,
            variant: variant.map(|v| VariantSnapshot { name: v.name.clone(), price_adjustment: v.price_adjustment, stock: v.stock_quantity }),
            added_at: Utc::now(),
        }
    }

    pub fn unit_price(&self) -> Money {
        self.base_price + self.variant.as_ref().map_or(Money::ZERO, |v| v.price_adjustment)
    }

    pub fn line_total(&self) -> Money { self.unit_price().multiply(self.quantity) }

    pub fn available_stock(&self) -> u32 {
        self.variant.as_ref().map_or(self.product_stock, |v| v.stock)
    }

    fn refresh_stock(&mut self, product: &Product, variant: Option<&Variant>) {
        self.product_stock = product.stock_quantity;
        if let (Some(snapshot), Some(v)) = (self.variant.as_mut(), variant) {
            snapshot.stock = v.stock_quantity;
        }
    }

    fn is_for(&self, product_id: &str, variant_id: Option<&str>) -> bool {
        self.product_id == product_id && self.variant_id.as_deref() == variant_id
    }
}

/// What happened to a line after a quantity change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuantityChange {
    Updated(u32),
    Removed,
}

impl Cart {
    pub fn new(user_id: UserId) -> Self { Self { user_id, lines: vec![] } }

    pub fn from_lines(user_id: UserId, lines: Vec<CartLine>) -> Self { Self { user_id, lines } }

    pub fn user_id(&self) -> &UserId { &self.user_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn line(&self, line_id: Uuid) -> Option<&CartLine> { self.lines.iter().find(|l| l.id == line_id) }

    pub fn total_items(&self) -> u32 { self.lines.iter().map(|l| l.quantity).sum() }

    pub fn subtotal(&self) -> Money { self.lines.iter().map(CartLine::line_total).sum() }

    /// Adds `quantity` of a product (or variant), merging into an existing line.
    ///
    /// Quantities past the available stock are capped, not rejected.
    pub fn add_item(&mut self, product: &Product, variant: Option<&Variant>, quantity: u32) -> Result<&CartLine> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let stock = product.available_stock(variant);
        if stock == 0 {
            return Err(EcommerceError::OutOfStock { name: product.name.clone(), requested: quantity, available: 0 });
        }
        let variant_id = variant.map(|v| v.id.as_str());
        let index = match self.lines.iter().position(|l| l.is_for(&product.id, variant_id)) {
            Some(index) => {
                let line = &mut self.lines[index];
                line.refresh_stock(product, variant);
                line.quantity = line.quantity.saturating_add(quantity).min(stock);
                index
            }
            None => {
                self.lines.push(CartLine::snapshot(product, variant, quantity.min(stock)));
                self.lines.len() - 1
            }
        };
        Ok(&self.lines[index])
    }

    /// Sets a line's quantity against the current `available` stock.
    ///
    /// Anything below 1 removes the line; a missing line is only an error when
    /// the caller asked for a positive quantity.
    pub fn update_quantity(&mut self, line_id: Uuid, quantity: i64, available: u32) -> Result<QuantityChange> {
        if quantity < 1 {
            self.remove_item(line_id);
            return Ok(QuantityChange::Removed);
        }
        let line = self.lines.iter_mut().find(|l| l.id == line_id).ok_or_else(|| EcommerceError::not_found(format!("cart line {line_id}")))?;
        let requested = u32::try_from(quantity).unwrap_or(u32::MAX);
        if requested > available {
            return Err(EcommerceError::StockExceeded { requested, available });
        }
        line.quantity = requested;
        match line.variant.as_mut() {
            Some(v) => v.stock = available,
            None => line.product_stock = available,
        }
        Ok(QuantityChange::Updated(requested))
    }

    /// Returns whether a line was actually removed.
    pub fn remove_item(&mut self, line_id: Uuid) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.id != line_id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) { self.lines.clear(); }

    /// Subtracts ordered quantities, dropping lines that reach zero.
    pub fn settle(&mut self, ordered: &[(Uuid, u32)]) {
        for (line_id, quantity) in ordered {
            if let Some(line) = self.lines.iter_mut().find(|l| l.id == *line_id) {
                line.quantity = line.quantity.saturating_sub(*quantity);
            }
        }
        self.lines.retain(|l| l.quantity > 0);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn product(id: &str, price_minor: i64, stock: u32) -> Product {
        Product {
            id: id.into(), name: format!("Product {id}"), slug: id.into(), base_price: Money::from_minor(price_minor),
            image: None, stock_quantity: stock, is_active: true, variants: vec![],
        }
    }

    #[test]
    fn test_merge_on_add_caps_at_stock() {
        let mut cart = Cart::new(UserId::from("u1"));
        let p = product("p1", 2_000, 5);
        cart.add_item(&p, None, 4).unwrap();
        let line = cart.add_item(&p, None, 3).unwrap();
        assert_eq!(line.quantity, 5);
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn test_variants_get_their_own_lines() {
        let mut cart = Cart::new(UserId::from("u1"));
        let mut p = product("p1", 1_000, 10);
        p.variants.push(Variant { id: "red".into(), name: "Red".into(), price_adjustment: Money::from_minor(-150), stock_quantity: 3, is_active: true });
        cart.add_item(&p, None, 1).unwrap();
        let red = p.variant("red").cloned();
        cart.add_item(&p, red.as_ref(), 2).unwrap();
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.total_items(), 3);
        assert_eq!(cart.subtotal(), Money::from_minor(1_000 + 2 * 850));
    }

    #[test]
    fn test_out_of_stock_and_zero_quantity() {
        let mut cart = Cart::new(UserId::from("u1"));
        let sold_out = product("p1", 500, 0);
        assert!(matches!(cart.add_item(&sold_out, None, 1), Err(EcommerceError::OutOfStock { .. })));
        let p = product("p2", 500, 3);
        assert_eq!(cart.add_item(&p, None, 0).unwrap_err(), EcommerceError::InvalidQuantity);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_subtotal() {
        let mut cart = Cart::new(UserId::from("u1"));
        cart.add_item(&product("a", 1_000, 10), None, 2).unwrap();
        cart.add_item(&product("b", 500, 10), None, 3).unwrap();
        assert_eq!(cart.subtotal(), Money::from_major(35));
    }

    #[test]
    fn test_quantity_floor_removes_line() {
        let mut cart = Cart::new(UserId::from("u1"));
        let id = cart.add_item(&product("a", 1_000, 10), None, 2).unwrap().id;
        assert_eq!(cart.update_quantity(id, -3, 10).unwrap(), QuantityChange::Removed);
        assert!(cart.line(id).is_none());
        assert_eq!(cart.update_quantity(id, 0, 10).unwrap(), QuantityChange::Removed);
    }

    #[test]
    fn test_stock_ceiling_rejects_without_mutation() {
        let mut cart = Cart::new(UserId::from("u1"));
        let id = cart.add_item(&product("a", 1_000, 4), None, 2).unwrap().id;
        let err = cart.update_quantity(id, 5, 4).unwrap_err();
        assert_eq!(err, EcommerceError::StockExceeded { requested: 5, available: 4 });
        assert_eq!(cart.line(id).unwrap().quantity, 2);
        assert_eq!(cart.update_quantity(id, 4, 4).unwrap(), QuantityChange::Updated(4));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut cart = Cart::new(UserId::from("u1"));
        let id = cart.add_item(&product("a", 1_000, 4), None, 1).unwrap().id;
        assert!(cart.remove_item(id));
        assert!(!cart.remove_item(id));
    }

    #[test]
    fn test_settle_subtracts_ordered_quantities() {
        let mut cart = Cart::new(UserId::from("u1"));
        let a = cart.add_item(&product("a", 1_000, 10), None, 3).unwrap().id;
        let b = cart.add_item(&product("b", 500, 10), None, 1).unwrap().id;
        let c = cart.add_item(&product("c", 500, 10), None, 2).unwrap().id;
        cart.settle(&[(a, 2), (b, 1), (Uuid::now_v7(), 4)]);
        assert_eq!(cart.line(a).unwrap().quantity, 1);
        assert!(cart.line(b).is_none());
        assert_eq!(cart.line(c).unwrap().quantity, 2);
    }

    #[test]
    fn test_update_unknown_line() {
        let mut cart = Cart::new(UserId::from("u1"));
        assert!(matches!(cart.update_quantity(Uuid::now_v7(), 2, 10), Err(EcommerceError::NotFound(_))));
    }
}
