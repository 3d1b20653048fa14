//! Storage ports for the checkout and payment core.
//!
//! Services only see the traits below. [`Store`] gives autocommit access and opens
//! transactions; [`StoreTx`] exposes the same operations scoped to one transaction, which is
//! rolled back if it is dropped without [`StoreTx::commit`].
//!
//! Two implementations ship with the crate: [`SeaOrmStore`] for relational databases and
//! [`memory::InMemoryStore`] for tests and local experiments.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::commerce::{cart, cart_item, customer_address, product, product_variant};
use crate::entities::{order, order_item, payment, OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;

pub mod address_repository;
pub mod cart_repository;
pub mod inventory_ledger;
pub mod memory;
pub mod order_repository;
pub mod payment_repository;

/// A cart together with its line items.
#[derive(Debug, Clone)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

#[derive(Debug, Clone)]
pub struct ProductWithVariants {
    pub product: product::Model,
    pub variants: Vec<product_variant::Model>,
}

impl ProductWithVariants {
    pub fn variant(&self, variant_id: Uuid) -> Option<&product_variant::Model> {
        self.variants.iter().find(|v| v.id == variant_id)
    }
}

/// An order aggregate: the order row plus its immutable line snapshots.
#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Optional filters for order listings. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
}

impl OrderFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, order: &order::Model) -> bool {
        self.user_id.map_or(true, |id| order.user_id == id)
            && self.status.map_or(true, |s| order.status == s)
            && self.payment_status.map_or(true, |s| order.payment_status == s)
            && self.payment_method.map_or(true, |m| order.payment_method == m)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u64 = 10;
    pub const MAX_LIMIT: u64 = 100;

    /// Normalizes raw query values: page defaults to 1, limit to 10 and is capped at 100.
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        if total == 0 {
            0
        } else {
            (total + self.limit - 1) / self.limit
        }
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1) * self.limit
    }
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_cart_with_items(&self, user_id: Uuid)
        -> Result<Option<CartWithItems>, ServiceError>;

    /// Removes every line of the cart, keeping the cart itself.
    async fn clear_cart(&self, cart_id: Uuid) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait AddressRepository: Send + Sync {
    async fn find_address(
        &self,
        address_id: Uuid,
    ) -> Result<Option<customer_address::Model>, ServiceError>;
}

/// Variant stock counters. Only ever mutated inside checkout or cancel transactions.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn find_product_with_variants(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductWithVariants>, ServiceError>;

    /// Decrements stock by `quantity` only if at least that much is available, as a single
    /// relative update. Returns `false` (and changes nothing) when stock is insufficient.
    async fn try_deduct_stock(&self, variant_id: Uuid, quantity: i32)
        -> Result<bool, ServiceError>;

    /// Puts `quantity` back on the variant. Returns `false` when the variant no longer exists.
    async fn restore_stock(&self, variant_id: Uuid, quantity: i32)
        -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError>;

    async fn find_order_by_code(&self, code: &str)
        -> Result<Option<OrderWithItems>, ServiceError>;

    /// Newest first, with the total number of matching orders.
    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<(Vec<OrderWithItems>, u64), ServiceError>;

    /// Persists the mutable fields of an order: status, payment status, cancel reason and
    /// `updated_at`.
    async fn update_order(&self, order: &order::Model) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_payment_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError>;

    async fn insert_payment(&self, payment: payment::Model) -> Result<(), ServiceError>;

    /// Persists status, transaction id, gateway response, `paid_at` and `updated_at`.
    async fn update_payment(&self, payment: &payment::Model) -> Result<(), ServiceError>;
}

/// All repositories inside one open transaction.
#[async_trait]
pub trait StoreTx:
    CartRepository + AddressRepository + InventoryLedger + OrderRepository + PaymentRepository
{
    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}

/// Autocommit access to all repositories plus the ability to open a transaction.
#[async_trait]
pub trait Store:
    CartRepository + AddressRepository + InventoryLedger + OrderRepository + PaymentRepository
{
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError>;
}

/// sea-orm backed repositories over either a pooled connection or an open transaction.
#[derive(Debug, Clone)]
pub struct SeaOrmStore<C = DatabaseConnection> {
    conn: C,
}

impl SeaOrmStore<DatabaseConnection> {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            conn: db.as_ref().clone(),
        }
    }
}

#[async_trait]
impl Store for SeaOrmStore<DatabaseConnection> {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let txn = self.conn.begin().await?;
        Ok(Box::new(SeaOrmStore { conn: txn }))
    }
}

#[async_trait]
impl StoreTx for SeaOrmStore<DatabaseTransaction> {
    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let store = *self;
        store.conn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_offset_is_one_based() {
        assert_eq!(PageRequest { page: 1, limit: 10 }.offset(), 0);
        assert_eq!(PageRequest { page: 3, limit: 10 }.offset(), 20);
        assert_eq!(PageRequest { page: 0, limit: 10 }.offset(), 0);
    }

    #[test]
    fn page_request_normalizes_query_values() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::new(Some(0), Some(0)), PageRequest { page: 1, limit: 1 });
        assert_eq!(PageRequest::new(Some(4), Some(500)), PageRequest { page: 4, limit: 100 });
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PageRequest::new(None, Some(10));
        assert_eq!(page.total_pages(0), 0);
        assert_eq!(page.total_pages(10), 1);
        assert_eq!(page.total_pages(11), 2);
    }
}
