//! MoMo wallet payments (captureWallet, API v2).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    hmac_sha256_hex, verify_hmac_sha256, whole_vnd, GatewayOutcome, PaymentGateway,
    PaymentRequest,
};
use crate::config::MoMoConfig;
use crate::entities::{order, PaymentMethod};
use crate::errors::ServiceError;

const REQUEST_TYPE: &str = "captureWallet";

/// Instant payment notification posted by MoMo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoMoIpn {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    pub order_info: String,
    pub order_type: String,
    pub trans_id: i64,
    pub result_code: i32,
    pub message: String,
    pub pay_type: String,
    pub response_time: i64,
    pub extra_data: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentRequest<'a> {
    partner_code: &'a str,
    request_type: &'a str,
    ipn_url: &'a str,
    redirect_url: &'a str,
    order_id: &'a str,
    amount: i64,
    order_info: String,
    request_id: String,
    extra_data: &'a str,
    lang: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentResponse {
    result_code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    pay_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MoMoGateway {
    config: MoMoConfig,
    client: reqwest::Client,
}

impl MoMoGateway {
    pub fn new(config: MoMoConfig, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn create_signature_data(
        &self,
        order_id: &str,
        amount: i64,
        order_info: &str,
        request_id: &str,
    ) -> String {
        format!(
            "accessKey={}&amount={}&extraData=&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.config.access_key,
            amount,
            self.config.ipn_url,
            order_id,
            order_info,
            self.config.partner_code,
            self.config.redirect_url,
            request_id,
            REQUEST_TYPE,
        )
    }

    fn ipn_signature_data(&self, ipn: &MoMoIpn) -> String {
        format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.config.access_key,
            ipn.amount,
            ipn.extra_data,
            ipn.message,
            ipn.order_id,
            ipn.order_info,
            ipn.order_type,
            ipn.partner_code,
            ipn.pay_type,
            ipn.request_id,
            ipn.response_time,
            ipn.result_code,
            ipn.trans_id,
        )
    }

    /// Signature MoMo would attach to `ipn`.
    pub fn sign_ipn(&self, ipn: &MoMoIpn) -> Result<String, ServiceError> {
        hmac_sha256_hex(&self.config.secret_key, &self.ipn_signature_data(ipn))
    }

    /// Verifies `ipn` and keeps `raw`, the body exactly as MoMo posted it, for audit.
    pub fn verify_ipn(
        &self,
        ipn: &MoMoIpn,
        raw: serde_json::Value,
    ) -> Result<GatewayOutcome, ServiceError> {
        if ipn.signature.trim().is_empty() {
            return Err(ServiceError::InvalidSignature);
        }
        if ipn.partner_code != self.config.partner_code {
            warn!(partner_code = %ipn.partner_code, "MoMo IPN for unknown partner");
            return Err(ServiceError::InvalidSignature);
        }
        if !verify_hmac_sha256(
            &self.config.secret_key,
            &self.ipn_signature_data(ipn),
            &ipn.signature,
        ) {
            return Err(ServiceError::InvalidSignature);
        }
        if ipn.order_id.is_empty() {
            return Err(ServiceError::InvalidInput("orderId is missing".to_string()));
        }

        Ok(GatewayOutcome {
            order_code: ipn.order_id.clone(),
            transaction_id: (ipn.trans_id > 0).then(|| ipn.trans_id.to_string()),
            success: ipn.result_code == 0,
            amount: Some(Decimal::from(ipn.amount)),
            raw,
        })
    }

    async fn create_payment(&self, order: &order::Model) -> Result<String, ServiceError> {
        let amount = whole_vnd(order.total_amount)?;
        let request_id = Uuid::new_v4().to_string();
        let order_info = format!("Thanh toan don hang {}", order.order_code);
        let signature = hmac_sha256_hex(
            &self.config.secret_key,
            &self.create_signature_data(&order.order_code, amount, &order_info, &request_id),
        )?;

        let body = CreatePaymentRequest {
            partner_code: &self.config.partner_code,
            request_type: REQUEST_TYPE,
            ipn_url: &self.config.ipn_url,
            redirect_url: &self.config.redirect_url,
            order_id: &order.order_code,
            amount,
            order_info,
            request_id,
            extra_data: "",
            lang: "vi",
            signature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("MoMo request failed: {}", e)))?;

        let status = response.status();
        let payload: CreatePaymentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("MoMo response unreadable: {}", e)))?;

        debug!(%status, result_code = payload.result_code, "MoMo create payment answered");

        match payload.pay_url {
            Some(url) if payload.result_code == 0 && !url.is_empty() => Ok(url),
            _ => Err(ServiceError::GatewayError(format!(
                "MoMo rejected payment ({}): {}",
                payload.result_code, payload.message
            ))),
        }
    }
}

#[async_trait]
impl PaymentGateway for MoMoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::MoMo
    }

    async fn redirect_url(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<Option<String>, ServiceError> {
        self.create_payment(request.order).await.map(Some)
    }
}
