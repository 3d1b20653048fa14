use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::{order, payment, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    repositories::{OrderRepository, PaymentRepository, Store, StoreTx},
    services::{
        gateways::{GatewayOutcome, GatewayRegistry, MoMoIpn, PaymentRequest},
        order_status,
    },
};

pub const COD_CONFIRMED_MESSAGE: &str = "COD payment confirmed";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitiatePaymentResponse {
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    /// `None` for cash on delivery
    pub payment_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(p: payment::Model) -> Self {
        Self {
            id: p.id,
            order_id: p.order_id,
            payment_method: p.payment_method,
            payment_status: p.payment_status,
            amount: p.amount,
            transaction_id: p.transaction_id,
            paid_at: p.paid_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// How a verified gateway callback was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// The payment moved to `paid` or `failed` as reported.
    Applied,
    /// The payment was already paid; only the audit payload changed.
    AlreadyPaid,
    /// The reported amount differs from the payment amount; the payment was marked failed.
    AmountMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResult {
    pub payment: PaymentResponse,
    pub disposition: CallbackDisposition,
}

fn pending_payment(order: &order::Model, transaction_id: Option<String>, now: DateTime<Utc>) -> payment::Model {
    payment::Model {
        id: Uuid::new_v4(),
        order_id: order.id,
        payment_method: order.payment_method,
        payment_status: PaymentStatus::Pending,
        amount: order.total_amount,
        transaction_id,
        gateway_response: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Marks a delivered cash-on-delivery order as paid.
///
/// Creates the payment row if initiation never happened. Only mutates `order` in memory; the
/// caller persists it.
pub(crate) async fn settle_cod_payment(
    tx: &dyn StoreTx,
    order: &mut order::Model,
    now: DateTime<Utc>,
) -> Result<payment::Model, ServiceError> {
    let mut payment = match tx.find_payment_by_order(order.id).await? {
        Some(p) => p,
        None => {
            let p = pending_payment(order, Some(Uuid::new_v4().to_string()), now);
            tx.insert_payment(p.clone()).await?;
            p
        }
    };

    if order.status == OrderStatus::Delivered && payment.payment_status == PaymentStatus::Pending {
        payment.payment_status = PaymentStatus::Paid;
        payment.paid_at = Some(now);
        payment.updated_at = now;
        tx.update_payment(&payment).await?;

        order.payment_status = PaymentStatus::Paid;
        order.updated_at = now;
        info!(order_code = %order.order_code, "COD payment collected");
    }

    Ok(payment)
}

/// Starts payments and reconciles gateway callbacks with orders.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateways: GatewayRegistry,
}

impl PaymentService {
    pub fn new(store: Arc<dyn Store>, gateways: GatewayRegistry) -> Self {
        Self { store, gateways }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Ensures a pending payment row exists and asks the order's gateway where to send the
    /// shopper. Cash on delivery has nowhere to go.
    #[instrument(skip(self, user, client_ip), fields(user_id = %user.user_id, order_id = %order_id))]
    pub async fn initiate_payment(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        client_ip: &str,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?
            .order;

        if order.user_id != user.user_id {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict("Order is already paid".to_string()));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::Conflict(
                "Cannot pay for a cancelled order".to_string(),
            ));
        }

        let tx = self.store.begin().await?;
        let now = Utc::now();
        match tx.find_payment_by_order(order.id).await? {
            None => tx.insert_payment(pending_payment(&order, None, now)).await?,
            Some(mut existing) if existing.payment_status == PaymentStatus::Failed => {
                // A new attempt after a declined one starts over
                existing.payment_status = PaymentStatus::Pending;
                existing.updated_at = now;
                tx.update_payment(&existing).await?;
            }
            Some(_) => {}
        }
        tx.commit().await?;

        let gateway = self.gateways.for_method(order.payment_method);
        let payment_url = gateway
            .redirect_url(&PaymentRequest {
                order: &order,
                client_ip,
            })
            .await?;

        counter!("storefront.payment.initiated", 1, "method" => order.payment_method.to_string());
        info!(payment_method = %order.payment_method, redirect = payment_url.is_some(), "Payment initiated");

        let message = match payment_url {
            Some(_) => "Redirect to payment gateway".to_string(),
            None => COD_CONFIRMED_MESSAGE.to_string(),
        };
        Ok(InitiatePaymentResponse {
            order_id: order.id,
            payment_method: order.payment_method,
            payment_url,
            message,
        })
    }

    /// Verifies a VNPay IPN/return query and applies it.
    #[instrument(skip(self, params), fields(order_code = params.get("vnp_TxnRef").map(String::as_str).unwrap_or("")))]
    pub async fn process_vnpay_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackResult, ServiceError> {
        let outcome = self.gateways.vnpay().verify_callback(params).map_err(|e| {
            counter!("storefront.payment.callback.rejected", 1, "method" => "vnpay");
            warn!(error = %e, "VNPay callback rejected");
            e
        })?;
        self.apply_gateway_result(PaymentMethod::VnPay, outcome).await
    }

    /// Parses, verifies and applies a MoMo IPN body. The body is stored as received.
    #[instrument(skip(self, payload), fields(order_code = payload.get("orderId").and_then(|v| v.as_str()).unwrap_or("")))]
    pub async fn process_momo_callback(
        &self,
        payload: serde_json::Value,
    ) -> Result<CallbackResult, ServiceError> {
        let ipn: MoMoIpn = serde_json::from_value(payload.clone())
            .map_err(|e| ServiceError::InvalidInput(format!("Malformed MoMo IPN: {}", e)))?;
        let outcome = self.gateways.momo().verify_ipn(&ipn, payload).map_err(|e| {
            counter!("storefront.payment.callback.rejected", 1, "method" => "momo");
            warn!(error = %e, "MoMo IPN rejected");
            e
        })?;
        self.apply_gateway_result(PaymentMethod::MoMo, outcome).await
    }

    /// Applies a verified gateway result to the payment and its order in one transaction.
    ///
    /// Replaying a success leaves status, `paid_at` and the order untouched and only refreshes
    /// the stored payload. A paid payment is never downgraded by a later failure.
    pub async fn apply_gateway_result(
        &self,
        method: PaymentMethod,
        outcome: GatewayOutcome,
    ) -> Result<CallbackResult, ServiceError> {
        let tx = self.store.begin().await?;

        let mut order = tx
            .find_order_by_code(&outcome.order_code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", outcome.order_code)))?
            .order;
        if order.payment_method != method {
            return Err(ServiceError::InvalidInput(format!(
                "Order {} is not paid with {}",
                order.order_code, method
            )));
        }

        let mut payment = tx
            .find_payment_by_order(order.id)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(order.order_code.clone()))?;

        let now = Utc::now();
        let amount_matches = outcome.amount.map_or(true, |a| a == payment.amount);
        if !amount_matches {
            warn!(
                expected = %payment.amount,
                reported = ?outcome.amount,
                "Gateway amount differs from payment amount; treating as failed"
            );
        }
        let success = outcome.success && amount_matches;

        payment.gateway_response = Some(outcome.raw);
        payment.updated_at = now;

        if payment.payment_status == PaymentStatus::Paid {
            if payment.transaction_id.is_none() {
                payment.transaction_id = outcome.transaction_id;
            }
            tx.update_payment(&payment).await?;
            tx.commit().await?;
            counter!("storefront.payment.callback.duplicate", 1, "method" => method.to_string());
            info!(success, "Callback for an already paid order; status kept");
            return Ok(CallbackResult {
                payment: payment.into(),
                disposition: CallbackDisposition::AlreadyPaid,
            });
        }

        if outcome.transaction_id.is_some() {
            payment.transaction_id = outcome.transaction_id;
        }

        if success {
            payment.payment_status = PaymentStatus::Paid;
            payment.paid_at = Some(now);

            order.payment_status = PaymentStatus::Paid;
            order.updated_at = now;
            match order.status {
                OrderStatus::Pending => {
                    order_status::validate_transition(order.status, OrderStatus::Processing)?;
                    order.status = OrderStatus::Processing;
                }
                OrderStatus::Cancelled => {
                    warn!(order_code = %order.order_code, "Payment captured for a cancelled order; refund required");
                }
                _ => {}
            }
            tx.update_order(&order).await?;
        } else {
            payment.payment_status = PaymentStatus::Failed;
        }

        tx.update_payment(&payment).await?;
        tx.commit().await?;

        let outcome_label = if success { "paid" } else { "failed" };
        counter!("storefront.payment.callback.applied", 1, "method" => method.to_string(), "outcome" => outcome_label);
        info!(
            order_code = %order.order_code,
            payment_status = %payment.payment_status,
            order_status = %order.status,
            "Gateway result applied"
        );
        let disposition = if amount_matches {
            CallbackDisposition::Applied
        } else {
            CallbackDisposition::AmountMismatch
        };
        Ok(CallbackResult {
            payment: payment.into(),
            disposition,
        })
    }

    /// Admin confirmation of cash collected on delivery.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_cod_payment(&self, order_id: Uuid) -> Result<PaymentResponse, ServiceError> {
        let tx = self.store.begin().await?;
        let mut order = tx
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?
            .order;

        if order.payment_method != PaymentMethod::Cod {
            return Err(ServiceError::InvalidInput(
                "Order is not a cash-on-delivery order".to_string(),
            ));
        }

        let before = order.payment_status;
        let payment = settle_cod_payment(&*tx, &mut order, Utc::now()).await?;
        if order.payment_status != before {
            tx.update_order(&order).await?;
        }
        tx.commit().await?;

        Ok(payment.into())
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id, order_id = %order_id))]
    pub async fn get_payment_by_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?
            .order;
        if !user.can_access(order.user_id) {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }

        self.store
            .find_payment_by_order(order_id)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::PaymentNotFound(order.order_code))
    }
}
