//! In-memory storage used by the test suite and for running the service without a database.
//!
//! Transactions take the store lock for their whole lifetime and work on a private copy of the
//! state; `commit` swaps the copy in, dropping the transaction discards it. Transactions are
//! therefore fully serialized. Do not call the non-transactional store from a task that holds an
//! open transaction: it waits on the same lock.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    AddressRepository, CartRepository, CartWithItems, InventoryLedger, OrderFilter,
    OrderRepository, OrderWithItems, PageRequest, PaymentRepository, ProductWithVariants, Store,
    StoreTx,
};
use crate::entities::commerce::{cart, cart_item, customer_address, product, product_variant};
use crate::entities::{order, order_item, payment};
use crate::errors::ServiceError;

/// Everything the in-memory store knows. Cloned wholesale when a transaction opens.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    products: HashMap<Uuid, product::Model>,
    variants: HashMap<Uuid, product_variant::Model>,
    carts: HashMap<Uuid, cart::Model>,
    cart_items: Vec<cart_item::Model>,
    addresses: HashMap<Uuid, customer_address::Model>,
    orders: Vec<order::Model>,
    order_items: Vec<order_item::Model>,
    payments: Vec<payment::Model>,
}

impl MemoryState {
    fn items_of(&self, order_id: Uuid) -> Vec<order_item::Model> {
        self.order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    fn with_items(&self, order: &order::Model) -> OrderWithItems {
        OrderWithItems {
            order: order.clone(),
            items: self.items_of(order.id),
        }
    }
}

/// How a [`MemoryStore`] reaches its state: directly through the shared lock, or through the
/// working copy of an open transaction.
#[async_trait]
pub trait StateAccess: Send + Sync {
    async fn with_state<R, F>(&self, f: F) -> Result<R, ServiceError>
    where
        F: FnOnce(&mut MemoryState) -> Result<R, ServiceError> + Send,
        R: Send;
}

#[derive(Debug, Clone, Default)]
pub struct Shared {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl StateAccess for Shared {
    async fn with_state<R, F>(&self, f: F) -> Result<R, ServiceError>
    where
        F: FnOnce(&mut MemoryState) -> Result<R, ServiceError> + Send,
        R: Send,
    {
        let mut state = self.state.lock().await;
        f(&mut state)
    }
}

pub struct TxState {
    guard: OwnedMutexGuard<MemoryState>,
    working: StdMutex<MemoryState>,
}

fn poisoned() -> ServiceError {
    ServiceError::InternalError("in-memory transaction state poisoned".to_string())
}

#[async_trait]
impl StateAccess for TxState {
    async fn with_state<R, F>(&self, f: F) -> Result<R, ServiceError>
    where
        F: FnOnce(&mut MemoryState) -> Result<R, ServiceError> + Send,
        R: Send,
    {
        let mut state = self.working.lock().map_err(|_| poisoned())?;
        f(&mut state)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore<A> {
    access: A,
}

pub type InMemoryStore = MemoryStore<Shared>;
pub type InMemoryTx = MemoryStore<TxState>;

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn state(&self) -> tokio::sync::MutexGuard<'_, MemoryState> {
        self.access.state.lock().await
    }

    /// Adds an active product with one variant per `(size, stock)` pair.
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        variants: &[(&str, i32)],
    ) -> ProductWithVariants {
        let now = Utc::now();
        let product = product::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: format!("{}-{}", name.to_lowercase().replace(' ', "-"), Uuid::new_v4().simple()),
            price,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let variants: Vec<product_variant::Model> = variants
            .iter()
            .map(|(size, stock)| product_variant::Model {
                id: Uuid::new_v4(),
                product_id: product.id,
                sku: format!("SKU-{}", Uuid::new_v4().simple()),
                size: size.to_string(),
                color: String::new(),
                stock_quantity: *stock,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let mut state = self.state().await;
        state.products.insert(product.id, product.clone());
        for variant in &variants {
            state.variants.insert(variant.id, variant.clone());
        }
        ProductWithVariants { product, variants }
    }

    pub async fn seed_address(&self, user_id: Uuid) -> customer_address::Model {
        let address = customer_address::Model {
            id: Uuid::new_v4(),
            user_id,
            full_name: "Nguyen Van A".to_string(),
            phone: "0901234567".to_string(),
            province: "Ho Chi Minh".to_string(),
            district: "Quan 1".to_string(),
            ward: "Ben Nghe".to_string(),
            detail_address: "12 Le Loi".to_string(),
            is_default: true,
            created_at: Utc::now(),
        };
        self.state()
            .await
            .addresses
            .insert(address.id, address.clone());
        address
    }

    /// Adds a line to the user's cart, creating the cart on first use.
    pub async fn add_to_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
        price: Decimal,
    ) -> cart_item::Model {
        let now = Utc::now();
        let mut state = self.state().await;
        let cart_id = match state.carts.values().find(|c| c.user_id == user_id) {
            Some(cart) => cart.id,
            None => {
                let cart = cart::Model {
                    id: Uuid::new_v4(),
                    user_id,
                    created_at: now,
                    updated_at: now,
                };
                let id = cart.id;
                state.carts.insert(id, cart);
                id
            }
        };
        let item = cart_item::Model {
            id: Uuid::new_v4(),
            cart_id,
            product_id,
            variant_id,
            quantity,
            price,
            created_at: now,
        };
        state.cart_items.push(item.clone());
        item
    }

    pub async fn remove_variant(&self, variant_id: Uuid) {
        self.state().await.variants.remove(&variant_id);
    }

    pub async fn set_product_price(&self, product_id: Uuid, price: Decimal) {
        if let Some(product) = self.state().await.products.get_mut(&product_id) {
            product.price = price;
        }
    }

    pub async fn set_product_active(&self, product_id: Uuid, is_active: bool) {
        if let Some(product) = self.state().await.products.get_mut(&product_id) {
            product.is_active = is_active;
        }
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> Option<i32> {
        self.state()
            .await
            .variants
            .get(&variant_id)
            .map(|v| v.stock_quantity)
    }

    pub async fn order_count(&self) -> usize {
        self.state().await.orders.len()
    }

    pub async fn cart_item_count(&self, user_id: Uuid) -> usize {
        let state = self.state().await;
        let Some(cart) = state.carts.values().find(|c| c.user_id == user_id) else {
            return 0;
        };
        state
            .cart_items
            .iter()
            .filter(|i| i.cart_id == cart.id)
            .count()
    }
}

#[async_trait]
impl<A: StateAccess> CartRepository for MemoryStore<A> {
    async fn find_cart_with_items(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        self.access
            .with_state(move |s| {
                let Some(cart) = s.carts.values().find(|c| c.user_id == user_id).cloned() else {
                    return Ok(None);
                };
                let items = s
                    .cart_items
                    .iter()
                    .filter(|i| i.cart_id == cart.id)
                    .cloned()
                    .collect();
                Ok(Some(CartWithItems { cart, items }))
            })
            .await
    }

    async fn clear_cart(&self, cart_id: Uuid) -> Result<u64, ServiceError> {
        self.access
            .with_state(move |s| {
                let before = s.cart_items.len();
                s.cart_items.retain(|i| i.cart_id != cart_id);
                Ok((before - s.cart_items.len()) as u64)
            })
            .await
    }
}

#[async_trait]
impl<A: StateAccess> AddressRepository for MemoryStore<A> {
    async fn find_address(
        &self,
        address_id: Uuid,
    ) -> Result<Option<customer_address::Model>, ServiceError> {
        self.access
            .with_state(move |s| Ok(s.addresses.get(&address_id).cloned()))
            .await
    }
}

#[async_trait]
impl<A: StateAccess> InventoryLedger for MemoryStore<A> {
    async fn find_product_with_variants(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductWithVariants>, ServiceError> {
        self.access
            .with_state(move |s| {
                let Some(product) = s.products.get(&product_id).cloned() else {
                    return Ok(None);
                };
                let variants = s
                    .variants
                    .values()
                    .filter(|v| v.product_id == product_id)
                    .cloned()
                    .collect();
                Ok(Some(ProductWithVariants { product, variants }))
            })
            .await
    }

    async fn try_deduct_stock(&self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        self.access
            .with_state(move |s| match s.variants.get_mut(&variant_id) {
                Some(v) if v.stock_quantity >= quantity => {
                    v.stock_quantity -= quantity;
                    v.updated_at = Utc::now();
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await
    }

    async fn restore_stock(&self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        self.access
            .with_state(move |s| {
                let Some(variant) = s.variants.get_mut(&variant_id) else {
                    return Ok(false);
                };
                variant.stock_quantity += quantity;
                variant.updated_at = Utc::now();
                Ok(true)
            })
            .await
    }
}

#[async_trait]
impl<A: StateAccess> OrderRepository for MemoryStore<A> {
    async fn insert_order(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError> {
        self.access
            .with_state(move |s| {
                if s.orders.iter().any(|o| o.order_code == order.order_code) {
                    return Err(ServiceError::Conflict(format!(
                        "order code {} already exists",
                        order.order_code
                    )));
                }
                s.orders.push(order.clone());
                s.order_items.extend(items.iter().cloned());
                Ok(OrderWithItems { order, items })
            })
            .await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        self.access
            .with_state(move |s| {
                Ok(s.orders
                    .iter()
                    .find(|o| o.id == order_id)
                    .map(|o| s.with_items(o)))
            })
            .await
    }

    async fn find_order_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        self.access
            .with_state(move |s| {
                Ok(s.orders
                    .iter()
                    .find(|o| o.order_code == code)
                    .map(|o| s.with_items(o)))
            })
            .await
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<(Vec<OrderWithItems>, u64), ServiceError> {
        self.access
            .with_state(move |s| {
                // Newest insert first among equal timestamps.
                let mut matching: Vec<&order::Model> =
                    s.orders.iter().rev().filter(|o| filter.matches(o)).collect();
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

                let total = matching.len() as u64;
                let orders = matching
                    .into_iter()
                    .skip(page.offset() as usize)
                    .take(page.limit as usize)
                    .map(|o| s.with_items(o))
                    .collect();
                Ok((orders, total))
            })
            .await
    }

    async fn update_order(&self, order: &order::Model) -> Result<(), ServiceError> {
        self.access
            .with_state(move |s| {
                let stored = s
                    .orders
                    .iter_mut()
                    .find(|o| o.id == order.id)
                    .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order.id)))?;
                stored.status = order.status;
                stored.payment_status = order.payment_status;
                stored.cancel_reason = order.cancel_reason.clone();
                stored.updated_at = order.updated_at;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl<A: StateAccess> PaymentRepository for MemoryStore<A> {
    async fn find_payment_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        self.access
            .with_state(move |s| Ok(s.payments.iter().find(|p| p.order_id == order_id).cloned()))
            .await
    }

    async fn insert_payment(&self, payment: payment::Model) -> Result<(), ServiceError> {
        self.access
            .with_state(move |s| {
                if let Some(txn) = payment.transaction_id.as_deref() {
                    if s.payments
                        .iter()
                        .any(|p| p.transaction_id.as_deref() == Some(txn))
                    {
                        return Err(ServiceError::Conflict(format!(
                            "transaction id {} already recorded",
                            txn
                        )));
                    }
                }
                s.payments.push(payment);
                Ok(())
            })
            .await
    }

    async fn update_payment(&self, payment: &payment::Model) -> Result<(), ServiceError> {
        self.access
            .with_state(move |s| {
                if let Some(txn) = payment.transaction_id.as_deref() {
                    if s.payments
                        .iter()
                        .any(|p| p.id != payment.id && p.transaction_id.as_deref() == Some(txn))
                    {
                        return Err(ServiceError::Conflict(format!(
                            "transaction id {} already recorded",
                            txn
                        )));
                    }
                }
                let stored = s
                    .payments
                    .iter_mut()
                    .find(|p| p.id == payment.id)
                    .ok_or_else(|| ServiceError::PaymentNotFound(payment.order_id.to_string()))?;
                stored.payment_status = payment.payment_status;
                stored.transaction_id = payment.transaction_id.clone();
                stored.gateway_response = payment.gateway_response.clone();
                stored.paid_at = payment.paid_at;
                stored.updated_at = payment.updated_at;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let guard = self.access.state.clone().lock_owned().await;
        let working = StdMutex::new((*guard).clone());
        Ok(Box::new(MemoryStore {
            access: TxState { guard, working },
        }))
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let TxState { mut guard, working } = self.access;
        *guard = working.into_inner().map_err(|_| poisoned())?;
        Ok(())
    }
}
