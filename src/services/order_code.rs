//! Human-facing order codes: `ORD-YYYYMMDD-XXXXXX`.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

const PREFIX: &str = "ORD";
const SUFFIX_LEN: usize = 6;
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Offset of Vietnam local time (no DST) from UTC.
pub const VN_UTC_OFFSET_HOURS: i64 = 7;

/// Generates a code dated with the current Vietnam calendar day.
pub fn generate_order_code() -> String {
    generate_order_code_at(Utc::now())
}

pub fn generate_order_code_at(now: DateTime<Utc>) -> String {
    let local = now + Duration::hours(VN_UTC_OFFSET_HOURS);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}-{}-{}", PREFIX, local.format("%Y%m%d"), suffix)
}

pub fn is_valid_order_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let (Some(prefix), Some(date), Some(suffix), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix == PREFIX
        && date.len() == 8
        && chrono::NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| CHARSET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn code_uses_vietnam_calendar_day() {
        // 2024-03-09 18:30 UTC is already 2024-03-10 in Hanoi
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap();
        let code = generate_order_code_at(now);
        assert!(code.starts_with("ORD-20240310-"), "{}", code);
        assert!(is_valid_order_code(&code));
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(!is_valid_order_code("ORD-20240310-abc123"));
        assert!(!is_valid_order_code("ORD-20241340-ABC123"));
        assert!(!is_valid_order_code("ORD-20240310-ABC12"));
        assert!(!is_valid_order_code("INV-20240310-ABC123"));
        assert!(!is_valid_order_code("ORD-20240310-ABC123-X"));
    }

    proptest! {
        #[test]
        fn generated_codes_are_well_formed(secs in 0i64..4_000_000_000i64) {
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            prop_assert!(is_valid_order_code(&generate_order_code_at(now)));
        }
    }
}
