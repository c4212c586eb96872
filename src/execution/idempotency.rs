use crate::models::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "tb-";
const KEY_HEX_LEN: usize = 24;

/// Time bucket an order belongs to for duplicate suppression
pub fn dedupe_bucket(now: DateTime<Utc>, window_sec: u64) -> i64 {
    if window_sec == 0 {
        return now.timestamp();
    }
    now.timestamp().div_euclid(window_sec as i64)
}

/// Deterministic client order id for an order within a dedupe bucket.
///
/// Same inputs always produce the same id, across processes and restarts, so a
/// resubmission after a crash lands on the exchange's own duplicate check.
pub fn client_order_id(symbol: &str, side: Side, price: Decimal, qty: Decimal, bucket: i64) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        symbol,
        side,
        price.normalize(),
        qty.normalize(),
        bucket
    );
    let digest = Sha256::digest(payload.as_bytes());
    let hex = hex::encode(digest);
    format!("{}{}", KEY_PREFIX, &hex[..KEY_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_id_is_stable_and_prefixed() {
        let a = client_order_id("BTCTRY", Side::Buy, dec!(100.0), dec!(1), 7);
        let b = client_order_id("BTCTRY", Side::Buy, dec!(100), dec!(1.000), 7);
        assert_eq!(a, b);
        assert!(a.starts_with("tb-"));
        assert_eq!(a.len(), 3 + 24);
    }

    #[test]
    fn test_id_changes_with_bucket_and_side() {
        let base = client_order_id("BTCTRY", Side::Buy, dec!(100), dec!(1), 7);
        assert_ne!(base, client_order_id("BTCTRY", Side::Buy, dec!(100), dec!(1), 8));
        assert_ne!(base, client_order_id("BTCTRY", Side::Sell, dec!(100), dec!(1), 7));
    }

    #[test]
    fn test_bucket_floors_by_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let b0 = dedupe_bucket(t0, 30);
        assert_eq!(dedupe_bucket(t0 + chrono::Duration::seconds(29), 30), b0);
        assert_eq!(dedupe_bucket(t0 + chrono::Duration::seconds(30), 30), b0 + 1);
    }
}
