//! VNPay v2.1.0 redirect payments.
//!
//! Both directions sign the same canonical string: parameters sorted by name, empty values
//! dropped, names and values form-urlencoded, joined as `k=v&k=v`, HMAC-SHA512 in hex.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use url::form_urlencoded::byte_serialize;

use super::{
    hmac_sha512_hex, verify_hmac_sha512, whole_vnd, GatewayOutcome, PaymentGateway,
    PaymentRequest,
};
use crate::config::VnPayConfig;
use crate::entities::{order, PaymentMethod};
use crate::errors::ServiceError;
use crate::services::order_code::VN_UTC_OFFSET_HOURS;

pub const VERSION: &str = "2.1.0";
pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const SUCCESS_CODE: &str = "00";

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Canonical `k=v&...` form of the non-empty parameters, in key order.
pub fn canonical_query<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let sorted: BTreeMap<&String, &String> = params
        .into_iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != SECURE_HASH && k.as_str() != SECURE_HASH_TYPE)
        .collect();

    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Clone)]
pub struct VnPayGateway {
    config: VnPayConfig,
}

impl VnPayGateway {
    pub fn new(config: VnPayConfig) -> Self {
        Self { config }
    }

    pub fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, ServiceError> {
        hmac_sha512_hex(&self.config.hash_secret, &canonical_query(params))
    }

    /// Builds the signed redirect URL for `order`, stamped with `now` in Vietnam time.
    pub fn build_payment_url(
        &self,
        order: &order::Model,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let amount = whole_vnd(order.total_amount)?
            .checked_mul(100)
            .ok_or_else(|| ServiceError::InvalidInput("order total too large".to_string()))?;
        let created = now + Duration::hours(VN_UTC_OFFSET_HOURS);

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), VERSION.to_string());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), amount.to_string());
        params.insert("vnp_CurrCode".to_string(), "VND".to_string());
        params.insert("vnp_TxnRef".to_string(), order.order_code.clone());
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Thanh toan don hang {}", order.order_code),
        );
        params.insert("vnp_OrderType".to_string(), "other".to_string());
        params.insert("vnp_Locale".to_string(), "vn".to_string());
        params.insert("vnp_ReturnUrl".to_string(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), client_ip.to_string());
        params.insert(
            "vnp_CreateDate".to_string(),
            created.format("%Y%m%d%H%M%S").to_string(),
        );

        let query = canonical_query(&params);
        let signature = hmac_sha512_hex(&self.config.hash_secret, &query)?;

        Ok(format!(
            "{}?{}&{}={}",
            self.config.payment_url, query, SECURE_HASH, signature
        ))
    }

    /// Checks the signature of a callback or return query and extracts its outcome.
    pub fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<GatewayOutcome, ServiceError> {
        let signature = params
            .get(SECURE_HASH)
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::InvalidSignature)?;

        if !verify_hmac_sha512(&self.config.hash_secret, &canonical_query(params), signature) {
            return Err(ServiceError::InvalidSignature);
        }

        let order_code = params
            .get("vnp_TxnRef")
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or_else(|| ServiceError::InvalidInput("vnp_TxnRef is missing".to_string()))?;

        let response_ok = params.get("vnp_ResponseCode").map(String::as_str) == Some(SUCCESS_CODE);
        let status_ok = params
            .get("vnp_TransactionStatus")
            .map_or(true, |s| s == SUCCESS_CODE);

        // VNPay reports "0" when no bank transaction was created
        let transaction_id = params
            .get("vnp_TransactionNo")
            .filter(|s| !s.is_empty() && s.as_str() != "0")
            .cloned();

        let amount = params
            .get("vnp_Amount")
            .and_then(|a| a.parse::<i64>().ok())
            .map(|minor| Decimal::from(minor) / Decimal::from(100));

        let raw = serde_json::to_value(params.iter().collect::<BTreeMap<_, _>>())
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        Ok(GatewayOutcome {
            order_code,
            transaction_id,
            success: response_ok && status_ok,
            amount,
            raw,
        })
    }
}

#[async_trait]
impl PaymentGateway for VnPayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::VnPay
    }

    async fn redirect_url(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<Option<String>, ServiceError> {
        self.build_payment_url(request.order, request.client_ip, Utc::now())
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{OrderStatus, PaymentStatus};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn gateway() -> VnPayGateway {
        VnPayGateway::new(VnPayConfig {
            tmn_code: "DEMO0001".to_string(),
            hash_secret: "VNPAYSECRETFORTESTS".to_string(),
            payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "https://shop.example/api/v1/payments/vnpay/return".to_string(),
        })
    }

    fn order() -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            order_code: "ORD-20240310-AB12CD".to_string(),
            user_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::VnPay,
            payment_status: PaymentStatus::Pending,
            subtotal_amount: dec!(500000),
            shipping_fee: dec!(30000),
            total_amount: dec!(530000),
            note: None,
            cancel_reason: None,
            shipping_full_name: "Nguyen Van A".to_string(),
            shipping_phone: "0901234567".to_string(),
            shipping_province: "Ha Noi".to_string(),
            shipping_district: "Hoan Kiem".to_string(),
            shipping_ward: "Hang Bac".to_string(),
            shipping_detail_address: "1 Hang Bac".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn query_params(url: &str) -> HashMap<String, String> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn canonical_query_sorts_encodes_and_skips_empty() {
        let params: HashMap<String, String> = [
            ("vnp_b", "x y"),
            ("vnp_a", "1"),
            ("vnp_empty", ""),
            (SECURE_HASH, "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(canonical_query(&params), "vnp_a=1&vnp_b=x+y");
    }

    #[test]
    fn payment_url_carries_amount_in_minor_units_and_local_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 5).unwrap();
        let url = gateway().build_payment_url(&order(), "203.0.113.9", now).unwrap();
        let params = query_params(&url);

        assert_eq!(params["vnp_Amount"], "53000000");
        assert_eq!(params["vnp_CreateDate"], "20240310013005");
        assert_eq!(params["vnp_TxnRef"], "ORD-20240310-AB12CD");
        assert_eq!(params["vnp_Version"], VERSION);
    }

    #[test]
    fn own_payment_url_verifies() {
        let gw = gateway();
        let url = gw.build_payment_url(&order(), "127.0.0.1", Utc::now()).unwrap();
        let mut params = query_params(&url);
        params.insert("vnp_ResponseCode".to_string(), "00".to_string());
        params.remove(SECURE_HASH);
        let signed: BTreeMap<String, String> = params.clone().into_iter().collect();
        params.insert(SECURE_HASH.to_string(), gw.sign(&signed).unwrap());

        let outcome = gw.verify_callback(&params).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.amount, Some(dec!(530000)));
        assert_eq!(outcome.order_code, "ORD-20240310-AB12CD");
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let gw = gateway();
        let url = gw.build_payment_url(&order(), "127.0.0.1", Utc::now()).unwrap();
        let mut params = query_params(&url);
        params.insert("vnp_Amount".to_string(), "100".to_string());

        assert_matches!(gw.verify_callback(&params), Err(ServiceError::InvalidSignature));
    }

    #[test]
    fn missing_hash_is_invalid_signature() {
        let params: HashMap<String, String> =
            [("vnp_TxnRef".to_string(), "ORD-20240310-AB12CD".to_string())].into();
        assert_matches!(
            gateway().verify_callback(&params),
            Err(ServiceError::InvalidSignature)
        );
    }

    #[test]
    fn failed_response_code_is_not_success() {
        let gw = gateway();
        let mut params: BTreeMap<String, String> = [
            ("vnp_TxnRef", "ORD-20240310-AB12CD"),
            ("vnp_ResponseCode", "24"),
            ("vnp_TransactionNo", "0"),
            ("vnp_Amount", "53000000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let signature = gw.sign(&params).unwrap();
        params.insert(SECURE_HASH.to_string(), signature);

        let outcome = gw
            .verify_callback(&params.into_iter().collect())
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.transaction_id, None);
    }

    proptest! {
        #[test]
        fn signing_is_symmetric(values in proptest::collection::btree_map("vnp_[A-Za-z]{1,8}", "[ -~]{0,16}", 1..8)) {
            let gw = gateway();
            let mut params: HashMap<String, String> = values.clone().into_iter().collect();
            params.insert("vnp_TxnRef".to_string(), "ORD-20240310-AB12CD".to_string());
            let signed: BTreeMap<String, String> = params.clone().into_iter().collect();
            params.insert(SECURE_HASH.to_string(), gw.sign(&signed).unwrap());
            prop_assert!(gw.verify_callback(&params).is_ok());
        }
    }
}
