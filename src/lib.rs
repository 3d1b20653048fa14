//! Storefront API Library
//!
//! Order, checkout and payment reconciliation core for a storefront backend that sells in VND
//! and collects money through VNPay, MoMo or cash on delivery.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    response::Json,
    routing::{get, post, put},
    Extension, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::notifications::OrderNotifier;
use crate::repositories::{PageRequest, Store};
use crate::services::{gateways::GatewayRegistry, CheckoutSettings, OrderService, PaymentService};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires services over `store` using the gateway and checkout settings in `config`.
    pub fn new(
        config: config::AppConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Result<Self, errors::ServiceError> {
        let gateways = GatewayRegistry::from_config(&config)?;
        let orders = OrderService::new(
            store.clone(),
            notifier,
            CheckoutSettings::from(&config),
        );
        let payments = PaymentService::new(store, gateways);
        let auth = Arc::new(AuthService::new(config.jwt_secret.clone()));

        Ok(Self {
            config: Arc::new(config),
            orders,
            payments,
            auth,
        })
    }
}

// Common query parameters for list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl From<&ListQuery> for PageRequest {
    fn from(query: &ListQuery) -> Self {
        PageRequest::new(query.page, query.limit)
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: PageRequest) -> Self {
        Self {
            items,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages(total),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn validation_errors_response_includes_metadata() {
        let response = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("meta-validation"),
            async { ApiResponse::<()>::validation_errors(vec!["missing".into()]) },
        )
        .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-validation"));
        assert_eq!(response.errors, Some(vec!["missing".to_string()]));
    }

    #[test]
    fn paginated_response_derives_total_pages() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 23, PageRequest::new(Some(3), Some(10)));
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 3);
        assert_eq!(page.limit, 10);
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/code/:code",
            get(handlers::orders::get_order_by_code),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .with_auth();

    let payments = Router::new()
        .route(
            "/payments/initiate",
            post(handlers::payments::initiate_payment),
        )
        .route(
            "/payments/order/:order_id",
            get(handlers::payments::get_payment_by_order),
        )
        .with_auth();

    // Gateway-facing; authenticity comes from the signature, not a bearer token
    let gateway_callbacks = Router::new()
        .route(
            "/payments/vnpay/callback",
            get(handlers::payments::vnpay_callback),
        )
        .route(
            "/payments/vnpay/return",
            get(handlers::payments::vnpay_return),
        )
        .route("/payments/momo/ipn", post(handlers::payments::momo_ipn))
        .route("/payments/momo/return", get(handlers::payments::momo_return));

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin::list_all_orders))
        .route(
            "/admin/orders/:id/status",
            put(handlers::admin::update_order_status),
        )
        .route(
            "/admin/orders/:id/confirm-cod",
            post(handlers::admin::confirm_cod_payment),
        )
        .with_role(ADMIN_ROLE);

    Router::new()
        .merge(orders)
        .merge(payments)
        .merge(gateway_callbacks)
        .merge(admin)
}

/// The full application router: health, the v1 API, and request-id, tracing and auth wiring.
/// CORS and timeouts are environment concerns and are layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    let auth = state.auth.clone();
    Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(Extension(auth))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
