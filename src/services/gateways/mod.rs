//! Payment gateway adapters.
//!
//! Adapters are stateless apart from their merchant configuration: they build outbound
//! redirect URLs and verify inbound callbacks, and never touch storage.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::{Sha256, Sha512};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::entities::{order, PaymentMethod};
use crate::errors::ServiceError;

pub mod cod;
pub mod momo;
pub mod vnpay;

pub use cod::CodGateway;
pub use momo::{MoMoGateway, MoMoIpn};
pub use vnpay::VnPayGateway;

/// What an adapter needs to start a payment for an order.
#[derive(Debug, Clone, Copy)]
pub struct PaymentRequest<'a> {
    pub order: &'a order::Model,
    pub client_ip: &'a str,
}

/// A verified callback, reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOutcome {
    /// Echoed order code
    pub order_code: String,
    pub transaction_id: Option<String>,
    pub success: bool,
    /// Amount the gateway says it captured, in VND
    pub amount: Option<Decimal>,
    /// Full payload, stored for audit
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Returns the URL the shopper must be sent to, or `None` when no redirect is needed.
    async fn redirect_url(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<Option<String>, ServiceError>;
}

/// One adapter per payment method.
#[derive(Clone)]
pub struct GatewayRegistry {
    vnpay: Arc<VnPayGateway>,
    momo: Arc<MoMoGateway>,
    cod: Arc<CodGateway>,
}

impl GatewayRegistry {
    pub fn new(vnpay: VnPayGateway, momo: MoMoGateway) -> Self {
        Self {
            vnpay: Arc::new(vnpay),
            momo: Arc::new(momo),
            cod: Arc::new(CodGateway),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(config.gateway_timeout_secs);
        Ok(Self::new(
            VnPayGateway::new(config.vnpay.clone()),
            MoMoGateway::new(config.momo.clone(), timeout)?,
        ))
    }

    pub fn for_method(&self, method: PaymentMethod) -> Arc<dyn PaymentGateway> {
        match method {
            PaymentMethod::VnPay => self.vnpay.clone(),
            PaymentMethod::MoMo => self.momo.clone(),
            PaymentMethod::Cod => self.cod.clone(),
        }
    }

    pub fn vnpay(&self) -> &VnPayGateway {
        &self.vnpay
    }

    pub fn momo(&self) -> &MoMoGateway {
        &self.momo
    }
}

pub(crate) fn hmac_sha512_hex(secret: &str, data: &str) -> Result<String, ServiceError> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn hmac_sha256_hex(secret: &str, data: &str) -> Result<String, ServiceError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex is a mismatch.
pub(crate) fn verify_hmac_sha512(secret: &str, data: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

pub(crate) fn verify_hmac_sha256(secret: &str, data: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Whole VND for an order total. Gateways reject fractional amounts.
pub(crate) fn whole_vnd(amount: Decimal) -> Result<i64, ServiceError> {
    use rust_decimal::prelude::ToPrimitive;
    amount
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("amount {} out of range", amount)))
}
