#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    app_router,
    auth::{AuthService, ADMIN_ROLE},
    config::{AppConfig, MoMoConfig, VnPayConfig},
    entities::order,
    notifications::{NotificationError, OrderNotifier},
    repositories::{memory::InMemoryStore, ProductWithVariants},
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const VNPAY_SECRET: &str = "VNPAYSECRETFORTESTS";
pub const MOMO_SECRET: &str = "K951B6PE1waDMi640xX08PD3vg6EkVlz";

/// Records confirmations so tests can assert they were sent after commit.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent_codes(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn send_order_confirmation(&self, order: &order::Model) -> Result<(), NotificationError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(order.order_code.clone());
        }
        Ok(())
    }
}

/// Configuration with sandbox-style merchant credentials.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        "test".to_string(),
    );
    cfg.frontend_url = "https://shop.example".to_string();
    cfg.vnpay = VnPayConfig {
        tmn_code: "DEMO0001".to_string(),
        hash_secret: VNPAY_SECRET.to_string(),
        payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
        return_url: "https://api.shop.example/api/v1/payments/vnpay/return".to_string(),
    };
    cfg.momo = MoMoConfig {
        partner_code: "MOMOTEST".to_string(),
        access_key: "F8BBA842ECF85".to_string(),
        secret_key: MOMO_SECRET.to_string(),
        endpoint: "http://127.0.0.1:9/v2/gateway/api/create".to_string(),
        ipn_url: "https://api.shop.example/api/v1/payments/momo/ipn".to_string(),
        redirect_url: "https://api.shop.example/api/v1/payments/momo/return".to_string(),
    };
    cfg
}

/// A shopper with an address and a cart, ready to check out.
pub struct Shopper {
    pub user_id: Uuid,
    pub token: String,
    pub address_id: Uuid,
}

/// Helper harness driving the full router over an in-memory store.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: InMemoryStore,
    pub notifier: Arc<RecordingNotifier>,
    auth: Arc<AuthService>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(cfg: AppConfig) -> Self {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(cfg, Arc::new(store.clone()), notifier.clone())
            .expect("build app state");
        let auth = state.auth.clone();

        Self {
            router: app_router(state.clone()),
            state,
            store,
            notifier,
            auth,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth
            .issue_token(user_id, &[], chrono::Duration::hours(1))
            .expect("issue token")
    }

    pub fn admin_token(&self) -> String {
        self.auth
            .issue_token(Uuid::new_v4(), &[ADMIN_ROLE], chrono::Duration::hours(1))
            .expect("issue admin token")
    }

    pub async fn shopper(&self) -> Shopper {
        let user_id = Uuid::new_v4();
        let address = self.store.seed_address(user_id).await;
        Shopper {
            user_id,
            token: self.token_for(user_id),
            address_id: address.id,
        }
    }

    /// Seeds a single-variant product and puts `quantity` of it in the shopper's cart.
    pub async fn fill_cart(
        &self,
        shopper: &Shopper,
        price: Decimal,
        stock: i32,
        quantity: i32,
    ) -> ProductWithVariants {
        let product = self
            .store
            .seed_product("Linen Shirt", price, &[("M", stock)])
            .await;
        self.store
            .add_to_cart(
                shopper.user_id,
                product.product.id,
                product.variants[0].id,
                quantity,
                price,
            )
            .await;
        product
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        self.request(Method::GET, uri, None, token).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> Response {
        self.request(Method::POST, uri, Some(body), token).await
    }

    /// Checks out the shopper's cart and returns the `data` of the created order.
    pub async fn checkout(&self, shopper: &Shopper, payment_method: &str) -> Value {
        let response = self
            .post(
                "/api/v1/orders",
                serde_json::json!({
                    "address_id": shopper.address_id,
                    "payment_method": payment_method,
                }),
                Some(shopper.token.as_str()),
            )
            .await;
        assert_eq!(response.status(), 201, "checkout should succeed");
        response_json(response).await["data"].clone()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
