use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    config::AppConfig,
    entities::{order, order_item, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    notifications::OrderNotifier,
    repositories::{
        AddressRepository, CartRepository, InventoryLedger, OrderFilter, OrderRepository,
        OrderWithItems, PageRequest, ProductWithVariants, Store, StoreTx,
    },
    services::{order_code::generate_order_code, order_status, payments::settle_cod_payment},
};

pub const ADMIN_CANCEL_REASON: &str = "cancelled by admin";

/// Body of `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub address_id: Uuid,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    #[validate(length(max = 500, message = "Note must be at most 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Cancel reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub province: String,
    pub district: String,
    pub ward: String,
    pub detail_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub variant_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_code: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub subtotal_amount: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub note: Option<String>,
    pub cancel_reason: Option<String>,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            product_name: item.product_name,
            variant_name: item.variant_name,
            price: item.price,
            quantity: item.quantity,
            subtotal: item.subtotal,
        }
    }
}

impl From<OrderWithItems> for OrderResponse {
    fn from(aggregate: OrderWithItems) -> Self {
        let OrderWithItems { order, items } = aggregate;
        Self {
            id: order.id,
            order_code: order.order_code,
            user_id: order.user_id,
            status: order.status,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            subtotal_amount: order.subtotal_amount,
            shipping_fee: order.shipping_fee,
            total_amount: order.total_amount,
            note: order.note,
            cancel_reason: order.cancel_reason,
            shipping_address: ShippingAddress {
                full_name: order.shipping_full_name,
                phone: order.shipping_phone,
                province: order.shipping_province,
                district: order.shipping_district,
                ward: order.shipping_ward,
                detail_address: order.shipping_detail_address,
            },
            items: items.into_iter().map(Into::into).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Checkout knobs taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub shipping_fee: Decimal,
    pub order_code_max_attempts: u32,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            shipping_fee: config.shipping_fee,
            order_code_max_attempts: config.order_code_max_attempts,
        }
    }
}

pub fn parse_payment_method(raw: &str) -> Result<PaymentMethod, ServiceError> {
    PaymentMethod::from_str(raw.trim()).map_err(|_| {
        ServiceError::InvalidInput(format!(
            "Invalid payment method '{}': expected one of cod, vnpay, momo",
            raw
        ))
    })
}

pub fn parse_order_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw.trim())
        .map_err(|_| ServiceError::InvalidInput(format!("Invalid order status '{}'", raw)))
}

/// Checkout orchestration and the order lifecycle.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn OrderNotifier>,
    settings: CheckoutSettings,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn OrderNotifier>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    /// Converts the user's cart into an order.
    ///
    /// Stock deduction, order insertion and cart clearing share one transaction; any failure
    /// leaves stock, orders and the cart exactly as they were. The confirmation notification is
    /// sent after commit and cannot fail the checkout.
    #[instrument(skip(self, request), fields(user_id = %user_id, address_id = %request.address_id))]
    pub async fn create_order_from_cart(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let created = match self.checkout(user_id, request).await {
            Ok(created) => created,
            Err(e) => {
                counter!("storefront.checkout.failed", 1);
                warn!(error = %e, "Checkout failed");
                return Err(e);
            }
        };

        counter!("storefront.checkout.completed", 1);
        info!(
            order_id = %created.order.id,
            order_code = %created.order.order_code,
            total = %created.order.total_amount,
            "Order created from cart"
        );

        if let Err(e) = self.notifier.send_order_confirmation(&created.order).await {
            counter!("storefront.notification.failed", 1);
            warn!(error = %e, order_id = %created.order.id, "Order confirmation not sent");
        }

        Ok(created.into())
    }

    async fn checkout(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        let payment_method = parse_payment_method(&request.payment_method)?;
        let note = request
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let tx = self.store.begin().await?;

        let cart = tx
            .find_cart_with_items(user_id)
            .await?
            .filter(|c| !c.items.is_empty())
            .ok_or(ServiceError::EmptyCart)?;

        let address = tx
            .find_address(request.address_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))?;
        if address.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Address does not belong to the current user".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let mut products: HashMap<Uuid, ProductWithVariants> = HashMap::new();
        let mut items = Vec::with_capacity(cart.items.len());
        let mut subtotal = Decimal::ZERO;

        for line in &cart.items {
            if line.quantity < 1 {
                return Err(ServiceError::InvalidInput(format!(
                    "Cart item {} has an invalid quantity",
                    line.id
                )));
            }

            if !products.contains_key(&line.product_id) {
                let product = tx
                    .find_product_with_variants(line.product_id)
                    .await?
                    .filter(|p| p.product.is_active)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", line.product_id))
                    })?;
                products.insert(line.product_id, product);
            }
            let Some(catalog) = products.get(&line.product_id) else {
                return Err(ServiceError::InternalError("product cache miss".to_string()));
            };
            let product = &catalog.product;
            let variant = catalog.variant(line.variant_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Variant {} of product {} not found",
                    line.variant_id, product.name
                ))
            })?;

            if !tx.try_deduct_stock(variant.id, line.quantity).await? {
                counter!("storefront.checkout.insufficient_stock", 1);
                return Err(ServiceError::InsufficientStock(product.name.clone()));
            }

            // Lines are charged at the live catalog price.
            if product.price != line.price {
                warn!(
                    product_id = %product.id,
                    cart_price = %line.price,
                    current_price = %product.price,
                    "Cart price differs from catalog price; charging catalog price"
                );
            }

            let line_total = product.price * Decimal::from(line.quantity);
            subtotal += line_total;
            items.push(order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                variant_id: variant.id,
                product_name: product.name.clone(),
                variant_name: variant.label(),
                price: product.price,
                quantity: line.quantity,
                subtotal: line_total,
                created_at: now,
            });
        }

        let shipping_fee = self.settings.shipping_fee;
        let order_code = self.allocate_order_code(&*tx).await?;

        let order = order::Model {
            id: order_id,
            order_code,
            user_id,
            status: OrderStatus::Pending,
            payment_method,
            payment_status: PaymentStatus::Pending,
            subtotal_amount: subtotal,
            shipping_fee,
            total_amount: subtotal + shipping_fee,
            note,
            cancel_reason: None,
            shipping_full_name: address.full_name,
            shipping_phone: address.phone,
            shipping_province: address.province,
            shipping_district: address.district,
            shipping_ward: address.ward,
            shipping_detail_address: address.detail_address,
            created_at: now,
            updated_at: now,
        };

        let created = tx.insert_order(order, items).await?;
        tx.clear_cart(cart.cart.id).await?;
        tx.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit checkout transaction");
            e
        })?;

        Ok(created)
    }

    /// Picks a code not yet used by any order. The unique index still guards concurrent
    /// checkouts that draw the same code.
    async fn allocate_order_code(&self, tx: &dyn StoreTx) -> Result<String, ServiceError> {
        let attempts = self.settings.order_code_max_attempts.max(1);
        for attempt in 1..=attempts {
            let code = generate_order_code();
            if tx.find_order_by_code(&code).await?.is_none() {
                return Ok(code);
            }
            counter!("storefront.checkout.order_code_collision", 1);
            warn!(attempt, order_code = %code, "Order code collision");
        }
        Err(ServiceError::Conflict(
            "Could not allocate a unique order code".to_string(),
        ))
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id, order_id = %order_id))]
    pub async fn get_order(&self, user: &AuthUser, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        ensure_access(user, &order.order)?;
        Ok(order.into())
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id, order_code = %code))]
    pub async fn get_order_by_code(
        &self,
        user: &AuthUser,
        code: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .store
            .find_order_by_code(code.trim())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        ensure_access(user, &order.order)?;
        Ok(order.into())
    }

    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        self.list_all_orders(OrderFilter::for_user(user_id), page)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_all_orders(
        &self,
        filter: OrderFilter,
        page: PageRequest,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let (orders, total) = self.store.list_orders(&filter, page).await?;
        Ok((orders.into_iter().map(Into::into).collect(), total))
    }

    /// Cancels an order on behalf of its owner (or an admin), restoring stock.
    #[instrument(skip(self, user, reason), fields(user_id = %user.user_id, order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cancel reason is required".to_string(),
            ));
        }

        let tx = self.store.begin().await?;
        let order = tx
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        ensure_access(user, &order.order)?;

        let cancelled = cancel_in_tx(&*tx, order, reason).await?;
        tx.commit().await?;

        counter!("storefront.order.cancelled", 1);
        info!(order_code = %cancelled.order.order_code, reason, "Order cancelled");
        Ok(cancelled.into())
    }

    /// Admin status change, validated against the lifecycle rules.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let tx = self.store.begin().await?;
        let current = tx
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        let old_status = current.order.status;

        let updated = if status == OrderStatus::Cancelled {
            cancel_in_tx(&*tx, current, ADMIN_CANCEL_REASON).await?
        } else {
            order_status::validate_transition(old_status, status)?;
            let OrderWithItems { mut order, items } = current;
            let now = Utc::now();
            order.status = status;
            order.updated_at = now;

            if status == OrderStatus::Delivered && order.payment_method == PaymentMethod::Cod {
                settle_cod_payment(&*tx, &mut order, now).await?;
            }

            tx.update_order(&order).await?;
            OrderWithItems { order, items }
        };

        tx.commit().await?;
        info!(
            old_status = %old_status,
            new_status = %updated.order.status,
            "Order status updated"
        );
        Ok(updated.into())
    }
}

fn ensure_access(user: &AuthUser, order: &order::Model) -> Result<(), ServiceError> {
    if user.can_access(order.user_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "You do not have access to this order".to_string(),
        ))
    }
}

/// Moves the order to `cancelled` and puts every line's quantity back on its variant.
async fn cancel_in_tx(
    tx: &dyn StoreTx,
    aggregate: OrderWithItems,
    reason: &str,
) -> Result<OrderWithItems, ServiceError> {
    let OrderWithItems { mut order, items } = aggregate;
    if !order_status::can_cancel(order.status) {
        return Err(ServiceError::InvalidTransition {
            from: order.status.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }

    for item in &items {
        if !tx.restore_stock(item.variant_id, item.quantity).await? {
            // The catalog dropped the variant; the order still cancels.
            counter!("storefront.order.cancel.stock_not_restored", 1);
            warn!(
                order_code = %order.order_code,
                variant_id = %item.variant_id,
                product_name = %item.product_name,
                quantity = item.quantity,
                "Variant no longer exists; stock not restored"
            );
        }
    }

    if order.payment_status == PaymentStatus::Paid {
        warn!(order_code = %order.order_code, "Cancelling an order that is already paid; refund required");
    }

    order.status = OrderStatus::Cancelled;
    order.cancel_reason = Some(reason.to_string());
    order.updated_at = Utc::now();
    tx.update_order(&order).await?;

    Ok(OrderWithItems { order, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn payment_method_parsing_is_strict() {
        assert_eq!(parse_payment_method("vnpay").unwrap(), PaymentMethod::VnPay);
        assert_eq!(parse_payment_method(" momo ").unwrap(), PaymentMethod::MoMo);
        assert_eq!(parse_payment_method("cod").unwrap(), PaymentMethod::Cod);
        assert_matches!(
            parse_payment_method("paypal"),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[test]
    fn order_status_parsing_rejects_unknown_values() {
        assert_eq!(parse_order_status("shipping").unwrap(), OrderStatus::Shipping);
        assert_matches!(parse_order_status("shipped"), Err(ServiceError::InvalidInput(_)));
    }
}
