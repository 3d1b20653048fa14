//! Payment initiation and gateway reconciliation through the HTTP surface.

mod common;

use std::collections::BTreeMap;

use axum::http::{header, Method};
use common::{response_json, test_config, Shopper, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::services::gateways::{vnpay::SECURE_HASH, MoMoIpn};
use storefront_api::repositories::PaymentRepository;
use url::form_urlencoded;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Places a 530000 VND order for `method` and returns it.
async fn place_order(app: &TestApp, shopper: &Shopper, method: &str) -> Value {
    app.fill_cart(shopper, dec!(250000), 10, 2).await;
    app.checkout(shopper, method).await
}

async fn initiate(app: &TestApp, shopper: &Shopper, order: &Value) -> axum::response::Response {
    app.post(
        "/api/v1/payments/initiate",
        json!({ "order_id": order["id"] }),
        Some(shopper.token.as_str()),
    )
    .await
}

async fn payment_of(app: &TestApp, shopper: &Shopper, order: &Value) -> Value {
    let response = app
        .get(
            &format!("/api/v1/payments/order/{}", order["id"].as_str().unwrap()),
            Some(shopper.token.as_str()),
        )
        .await;
    assert_eq!(response.status(), 200);
    response_json(response).await["data"].clone()
}

async fn order_of(app: &TestApp, shopper: &Shopper, order: &Value) -> Value {
    let response = app
        .get(
            &format!("/api/v1/orders/{}", order["id"].as_str().unwrap()),
            Some(shopper.token.as_str()),
        )
        .await;
    assert_eq!(response.status(), 200);
    response_json(response).await["data"].clone()
}

/// A VNPay callback query signed with the merchant secret.
fn vnpay_query(app: &TestApp, order_code: &str, amount_minor: i64, response_code: &str) -> String {
    let mut params: BTreeMap<String, String> = [
        ("vnp_TmnCode", "DEMO0001".to_string()),
        ("vnp_Amount", amount_minor.to_string()),
        ("vnp_BankCode", "NCB".to_string()),
        ("vnp_OrderInfo", format!("Thanh toan don hang {}", order_code)),
        ("vnp_PayDate", "20240310103000".to_string()),
        ("vnp_ResponseCode", response_code.to_string()),
        ("vnp_TransactionNo", "14312345".to_string()),
        ("vnp_TransactionStatus", response_code.to_string()),
        ("vnp_TxnRef", order_code.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let signature = app
        .state
        .payments
        .gateways()
        .vnpay()
        .sign(&params)
        .expect("sign vnpay params");
    params.insert(SECURE_HASH.to_string(), signature);

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

async fn vnpay_ipn(app: &TestApp, query: &str) -> Value {
    let response = app
        .get(&format!("/api/v1/payments/vnpay/callback?{}", query), None)
        .await;
    assert_eq!(response.status(), 200, "VNPay IPN always answers 200");
    response_json(response).await
}

fn momo_ipn(app: &TestApp, order_code: &str, amount: i64, result_code: i32) -> MoMoIpn {
    let mut ipn = MoMoIpn {
        partner_code: "MOMOTEST".to_string(),
        order_id: order_code.to_string(),
        request_id: "req-ipn-1".to_string(),
        amount,
        order_info: format!("Thanh toan don hang {}", order_code),
        order_type: "momo_wallet".to_string(),
        trans_id: 4088878653,
        result_code,
        message: "Successful.".to_string(),
        pay_type: "qr".to_string(),
        response_time: 1710068400000,
        extra_data: String::new(),
        signature: String::new(),
    };
    ipn.signature = app
        .state
        .payments
        .gateways()
        .momo()
        .sign_ipn(&ipn)
        .expect("sign momo ipn");
    ipn
}

#[tokio::test]
async fn vnpay_initiation_returns_signed_redirect() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initiate",
            Some(json!({ "order_id": order["id"] })),
            Some(shopper.token.as_str()),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    let url = body["data"]["payment_url"].as_str().unwrap();

    assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));
    let params: BTreeMap<String, String> = url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(params["vnp_Amount"], "53000000");
    assert_eq!(params["vnp_TxnRef"], order["order_code"].as_str().unwrap());
    assert!(params.contains_key(SECURE_HASH));

    let payment = payment_of(&app, &shopper, &order).await;
    assert_eq!(payment["payment_status"], "pending");
    assert_eq!(payment["amount"], "530000");
}

#[tokio::test]
async fn vnpay_success_marks_paid_and_replay_is_idempotent() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;
    assert_eq!(initiate(&app, &shopper, &order).await.status(), 200);
    let code = order["order_code"].as_str().unwrap();
    let query = vnpay_query(&app, code, 53_000_000, "00");

    let ack = vnpay_ipn(&app, &query).await;
    assert_eq!(ack, json!({ "RspCode": "00", "Message": "Confirm Success" }));

    let payment = payment_of(&app, &shopper, &order).await;
    assert_eq!(payment["payment_status"], "paid");
    assert_eq!(payment["transaction_id"], "14312345");
    let paid_at = payment["paid_at"].clone();
    assert!(!paid_at.is_null());

    let current = order_of(&app, &shopper, &order).await;
    assert_eq!(current["status"], "processing");
    assert_eq!(current["payment_status"], "paid");

    let replay = vnpay_ipn(&app, &query).await;
    assert_eq!(
        replay,
        json!({ "RspCode": "02", "Message": "Order already confirmed" })
    );
    let payment = payment_of(&app, &shopper, &order).await;
    assert_eq!(payment["payment_status"], "paid");
    assert_eq!(payment["paid_at"], paid_at);
    assert_eq!(order_of(&app, &shopper, &order).await["status"], "processing");

    // A late failure for the same order never downgrades the payment
    let failure = vnpay_query(&app, code, 53_000_000, "24");
    assert_eq!(vnpay_ipn(&app, &failure).await["RspCode"], "02");
    assert_eq!(payment_of(&app, &shopper, &order).await["payment_status"], "paid");

    let again = initiate(&app, &shopper, &order).await;
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn vnpay_tampered_query_is_rejected_with_97() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;
    initiate(&app, &shopper, &order).await;
    let code = order["order_code"].as_str().unwrap();

    let query = vnpay_query(&app, code, 53_000_000, "00").replace("vnp_Amount=53000000", "vnp_Amount=100");
    let ack = vnpay_ipn(&app, &query).await;

    assert_eq!(ack["RspCode"], "97");
    assert_eq!(payment_of(&app, &shopper, &order).await["payment_status"], "pending");
    assert_eq!(order_of(&app, &shopper, &order).await["status"], "pending");
}

#[tokio::test]
async fn vnpay_unknown_order_is_reported_with_01() {
    let app = TestApp::new();
    let ack = vnpay_ipn(&app, &vnpay_query(&app, "ORD-20240310-ZZZZZZ", 100_000, "00")).await;
    assert_eq!(ack["RspCode"], "01");
}

#[tokio::test]
async fn vnpay_signed_amount_mismatch_fails_the_payment() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;
    initiate(&app, &shopper, &order).await;
    let code = order["order_code"].as_str().unwrap();

    let ack = vnpay_ipn(&app, &vnpay_query(&app, code, 100, "00")).await;

    assert_eq!(ack, json!({ "RspCode": "04", "Message": "Invalid amount" }));
    assert_eq!(payment_of(&app, &shopper, &order).await["payment_status"], "failed");
    assert_eq!(order_of(&app, &shopper, &order).await["status"], "pending");

    // The shopper may try again after a failed attempt
    assert_eq!(initiate(&app, &shopper, &order).await.status(), 200);
    assert_eq!(payment_of(&app, &shopper, &order).await["payment_status"], "pending");
}

#[tokio::test]
async fn vnpay_return_redirects_to_frontend() {
    let app = TestApp::new();
    let code = "ORD-20240310-AB12CD";

    let ok = app
        .get(
            &format!("/api/v1/payments/vnpay/return?{}", vnpay_query(&app, code, 100, "00")),
            None,
        )
        .await;
    assert_eq!(ok.status(), 307);
    assert_eq!(
        ok.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/payment/success?order_code=ORD-20240310-AB12CD"
    );

    let declined = app
        .get(
            &format!("/api/v1/payments/vnpay/return?{}", vnpay_query(&app, code, 100, "24")),
            None,
        )
        .await;
    assert_eq!(
        declined.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/payment/failure?order_code=ORD-20240310-AB12CD"
    );

    let forged = app
        .get(
            "/api/v1/payments/vnpay/return?vnp_TxnRef=ORD-20240310-AB12CD&vnp_ResponseCode=00",
            None,
        )
        .await;
    assert_eq!(
        forged.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/payment/failure?order_code=ORD-20240310-AB12CD"
    );
}

#[tokio::test]
async fn momo_initiation_and_ipn_settle_the_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "partnerCode": "MOMOTEST",
            "resultCode": 0,
            "message": "Successful.",
            "payUrl": "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = test_config();
    cfg.momo.endpoint = format!("{}/v2/gateway/api/create", server.uri());
    let app = TestApp::with_config(cfg);
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "momo").await;

    let response = initiate(&app, &shopper, &order).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(
        body["data"]["payment_url"],
        "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
    );

    let code = order["order_code"].as_str().unwrap();
    let ipn = momo_ipn(&app, code, 530000, 0);
    let response = app
        .post("/api/v1/payments/momo/ipn", serde_json::to_value(&ipn).unwrap(), None)
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response_json(response).await,
        json!({ "resultCode": 0, "message": "Success" })
    );

    let payment = payment_of(&app, &shopper, &order).await;
    assert_eq!(payment["payment_status"], "paid");
    assert_eq!(payment["transaction_id"], "4088878653");
    assert_eq!(order_of(&app, &shopper, &order).await["status"], "processing");
}

#[tokio::test]
async fn momo_ipn_body_is_stored_as_received() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCode": 0,
            "message": "Successful.",
            "payUrl": "https://test-payment.momo.vn/v2/gateway/pay?t=xyz"
        })))
        .mount(&server)
        .await;

    let mut cfg = test_config();
    cfg.momo.endpoint = format!("{}/v2/gateway/api/create", server.uri());
    let app = TestApp::with_config(cfg);
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "momo").await;
    assert_eq!(initiate(&app, &shopper, &order).await.status(), 200);
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    // Unsigned fields MoMo adds to the notification are kept for audit
    let ipn = momo_ipn(&app, order["order_code"].as_str().unwrap(), 530000, 0);
    let mut body = serde_json::to_value(&ipn).unwrap();
    body["paymentOption"] = json!("momo");
    body["userFee"] = json!(0);

    let response = app.post("/api/v1/payments/momo/ipn", body.clone(), None).await;
    assert_eq!(response.status(), 200);

    let stored = app
        .store
        .find_payment_by_order(order_id)
        .await
        .unwrap()
        .expect("payment row");
    assert_eq!(stored.gateway_response, Some(body));
}

#[tokio::test]
async fn momo_rejection_surfaces_as_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCode": 98,
            "message": "QR Code tao khong thanh cong."
        })))
        .mount(&server)
        .await;

    let mut cfg = test_config();
    cfg.momo.endpoint = format!("{}/v2/gateway/api/create", server.uri());
    let app = TestApp::with_config(cfg);
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "momo").await;

    let response = initiate(&app, &shopper, &order).await;
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn momo_ipn_with_bad_signature_is_refused() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "momo").await;
    let code = order["order_code"].as_str().unwrap();

    let mut ipn = momo_ipn(&app, code, 530000, 0);
    ipn.amount = 1000;
    let response = app
        .post("/api/v1/payments/momo/ipn", serde_json::to_value(&ipn).unwrap(), None)
        .await;

    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["resultCode"], 1);

    let malformed = app
        .request(
            Method::POST,
            "/api/v1/payments/momo/ipn",
            Some(json!("not an ipn")),
            None,
        )
        .await;
    assert_eq!(malformed.status(), 400);
}

#[tokio::test]
async fn momo_return_redirects_by_result_code() {
    let app = TestApp::new();
    let ok = app
        .get(
            "/api/v1/payments/momo/return?orderId=ORD-20240310-AB12CD&resultCode=0",
            None,
        )
        .await;
    assert_eq!(
        ok.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/payment/success?order_code=ORD-20240310-AB12CD"
    );

    let cancelled = app
        .get(
            "/api/v1/payments/momo/return?orderId=ORD-20240310-AB12CD&resultCode=1006",
            None,
        )
        .await;
    assert_eq!(
        cancelled.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/payment/failure?order_code=ORD-20240310-AB12CD"
    );
}

#[tokio::test]
async fn cod_is_settled_on_delivery() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "cod").await;

    let response = initiate(&app, &shopper, &order).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert!(body["data"]["payment_url"].is_null());
    assert_eq!(body["data"]["message"], "COD payment confirmed");

    let admin = app.admin_token();
    let uri = format!("/api/v1/admin/orders/{}/status", order["id"].as_str().unwrap());
    for status in ["processing", "shipping", "delivered"] {
        let response = app
            .request(Method::PUT, &uri, Some(json!({ "status": status })), Some(admin.as_str()))
            .await;
        assert_eq!(response.status(), 200);
    }

    let payment = payment_of(&app, &shopper, &order).await;
    assert_eq!(payment["payment_status"], "paid");
    assert!(!payment["paid_at"].is_null());
    assert_eq!(order_of(&app, &shopper, &order).await["payment_status"], "paid");
}

#[tokio::test]
async fn admin_cod_confirmation_creates_missing_payment() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "cod").await;
    let admin = app.admin_token();

    let response = app
        .post(
            &format!("/api/v1/admin/orders/{}/confirm-cod", order["id"].as_str().unwrap()),
            json!({}),
            Some(admin.as_str()),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    // Not delivered yet, so the cash has not been collected
    assert_eq!(body["data"]["payment_status"], "pending");
    assert!(!body["data"]["transaction_id"].is_null());

    let vnpay_order = place_order(&app, &shopper, "vnpay").await;
    let wrong_method = app
        .post(
            &format!("/api/v1/admin/orders/{}/confirm-cod", vnpay_order["id"].as_str().unwrap()),
            json!({}),
            Some(admin.as_str()),
        )
        .await;
    assert_eq!(wrong_method.status(), 400);
}

#[tokio::test]
async fn success_after_cancellation_records_payment_but_keeps_order_cancelled() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;
    initiate(&app, &shopper, &order).await;

    let cancel = app
        .post(
            &format!("/api/v1/orders/{}/cancel", order["id"].as_str().unwrap()),
            json!({ "reason": "ordered twice" }),
            Some(shopper.token.as_str()),
        )
        .await;
    assert_eq!(cancel.status(), 200);
    assert_eq!(initiate(&app, &shopper, &order).await.status(), 409);

    let code = order["order_code"].as_str().unwrap();
    let ack = vnpay_ipn(&app, &vnpay_query(&app, code, 53_000_000, "00")).await;
    assert_eq!(ack["RspCode"], "00");

    assert_eq!(payment_of(&app, &shopper, &order).await["payment_status"], "paid");
    let current = order_of(&app, &shopper, &order).await;
    assert_eq!(current["status"], "cancelled");
    assert_eq!(current["payment_status"], "paid");
}

#[tokio::test]
async fn initiation_is_owner_only() {
    let app = TestApp::new();
    let shopper = app.shopper().await;
    let stranger = app.shopper().await;
    let order = place_order(&app, &shopper, "vnpay").await;

    let response = initiate(&app, &stranger, &order).await;
    assert_eq!(response.status(), 403);
}
