//! Payment endpoints: shopper-facing initiation plus the unauthenticated gateway callbacks.
//!
//! Gateway-facing handlers never surface a generic error body. Each gateway retries based on
//! its own acknowledgement contract, so failures are translated into that contract here.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr};
use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::AppState,
    services::payments::{
        CallbackDisposition, CallbackResult, InitiatePaymentRequest, InitiatePaymentResponse,
        PaymentResponse,
    },
    ApiResponse, ApiResult,
};

const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Acknowledgement body VNPay expects from the IPN endpoint.
#[derive(Debug, Serialize)]
pub struct VnPayIpnAck {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl VnPayIpnAck {
    fn for_result(result: &Result<CallbackResult, ServiceError>) -> Self {
        let (rsp_code, message) = match result {
            Ok(r) => match r.disposition {
                CallbackDisposition::Applied => ("00", "Confirm Success"),
                CallbackDisposition::AlreadyPaid => ("02", "Order already confirmed"),
                CallbackDisposition::AmountMismatch => ("04", "Invalid amount"),
            },
            Err(ServiceError::InvalidSignature) => ("97", "Invalid signature"),
            Err(ServiceError::NotFound(_)) | Err(ServiceError::PaymentNotFound(_)) => {
                ("01", "Order not found")
            }
            Err(_) => ("99", "Unknown error"),
        };
        Self { rsp_code, message }
    }
}

/// First hop of `x-forwarded-for`, then `x-real-ip`, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_CLIENT_IP.to_string())
}

fn frontend_redirect(frontend_url: &str, success: bool, order_code: &str) -> Redirect {
    let outcome = if success { "success" } else { "failure" };
    let code: String = byte_serialize(order_code.as_bytes()).collect();
    Redirect::temporary(&format!(
        "{}/payment/{}?order_code={}",
        frontend_url.trim_end_matches('/'),
        outcome,
        code
    ))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<InitiatePaymentResponse> {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let response = state
        .payments
        .initiate_payment(&auth_user, request.order_id, &ip)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

pub async fn get_payment_by_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .payments
        .get_payment_by_order(&auth_user, order_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// VNPay IPN. Always answers 200 with an `RspCode`.
pub async fn vnpay_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<VnPayIpnAck> {
    let result = state.payments.process_vnpay_callback(&params).await;
    if let Err(e) = &result {
        warn!(error = %e, "VNPay IPN not applied");
    }
    Json(VnPayIpnAck::for_result(&result))
}

/// Browser return from VNPay. Only the signature is checked; the IPN owns state changes.
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let order_code = params.get("vnp_TxnRef").cloned().unwrap_or_default();
    let success = match state.payments.gateways().vnpay().verify_callback(&params) {
        Ok(outcome) => outcome.success,
        Err(e) => {
            warn!(error = %e, order_code = %order_code, "VNPay return failed verification");
            false
        }
    };
    frontend_redirect(&state.config.frontend_url, success, &order_code)
}

pub async fn momo_ipn(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(body)) => state.payments.process_momo_callback(body).await,
        Err(rejection) => Err(ServiceError::InvalidInput(rejection.body_text())),
    };

    match result {
        Ok(applied) => {
            debug!(payment_id = %applied.payment.id, disposition = ?applied.disposition, "MoMo IPN acknowledged");
            (
                StatusCode::OK,
                Json(json!({ "resultCode": 0, "message": "Success" })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "MoMo IPN not applied");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "resultCode": 1, "message": e.response_message() })),
            )
                .into_response()
        }
    }
}

/// Browser return from MoMo.
pub async fn momo_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let success = params.get("resultCode").map(String::as_str) == Some("0");
    let order_code = params.get("orderId").cloned().unwrap_or_default();
    frontend_redirect(&state.config.frontend_url, success, &order_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_back_to_peer_then_loopback() {
        let peer: SocketAddr = "192.0.2.10:5123".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.10");
        assert_eq!(client_ip(&HeaderMap::new(), None), FALLBACK_CLIENT_IP);
    }

    #[test]
    fn ipn_ack_codes_follow_vnpay_contract() {
        let not_found: Result<CallbackResult, ServiceError> =
            Err(ServiceError::NotFound("order".into()));
        assert_eq!(VnPayIpnAck::for_result(&not_found).rsp_code, "01");
        assert_eq!(
            VnPayIpnAck::for_result(&Err(ServiceError::InvalidSignature)).rsp_code,
            "97"
        );
        assert_eq!(
            VnPayIpnAck::for_result(&Err(ServiceError::InternalError("db".into()))).rsp_code,
            "99"
        );
    }

    #[test]
    fn applied_callbacks_report_replays_and_amount_mismatches() {
        use crate::entities::{PaymentMethod, PaymentStatus};
        use rust_decimal_macros::dec;

        let now = chrono::Utc::now();
        let payment = PaymentResponse {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            payment_method: PaymentMethod::VnPay,
            payment_status: PaymentStatus::Paid,
            amount: dec!(530000),
            transaction_id: Some("14312345".into()),
            paid_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let ack = |disposition| {
            VnPayIpnAck::for_result(&Ok(CallbackResult {
                payment: payment.clone(),
                disposition,
            }))
            .rsp_code
        };

        assert_eq!(ack(CallbackDisposition::Applied), "00");
        assert_eq!(ack(CallbackDisposition::AlreadyPaid), "02");
        assert_eq!(ack(CallbackDisposition::AmountMismatch), "04");
    }

    #[test]
    fn redirect_targets_frontend_outcome_page() {
        let response = frontend_redirect("https://shop.example/", true, "ORD-20240310-AB12CD")
            .into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://shop.example/payment/success?order_code=ORD-20240310-AB12CD"
        );
    }
}
