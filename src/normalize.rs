//! Text-to-number conversion and discount derivation. No I/O.

use chrono::{DateTime, Utc};

use crate::record::{ExtractionAttempt, PriceRecord};

/// Parses a price like `"$1,299.99"` into `1299.99`.
///
/// Keeps digits and `.` only. Returns `None` when nothing numeric is left or
/// more than one decimal separator survives (price ranges, garbage).
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) || cleaned.matches('.').count() > 1 {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `(amount, percentage)` when `list > current`, otherwise `None`.
pub fn derive_discount(current: Option<f64>, list: Option<f64>) -> Option<(f64, f64)> {
    let (current, list) = (current?, list?);
    if list <= current {
        return None;
    }
    let amount = round_to(list - current, 2);
    let percentage = round_to(amount / list * 100.0, 1);
    Some((amount, percentage))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Turns an attempt into a record stamped with the current time.
pub fn normalize(attempt: ExtractionAttempt) -> PriceRecord {
    normalize_at(attempt, Utc::now())
}

pub fn normalize_at(attempt: ExtractionAttempt, captured_at: DateTime<Utc>) -> PriceRecord {
    let current_price = attempt.current_price().map(str::to_string);
    let current_price_numeric = current_price.as_deref().and_then(parse_price);
    let list_price_numeric = attempt.list_price.as_deref().and_then(parse_price);
    let discount = derive_discount(current_price_numeric, list_price_numeric);

    PriceRecord {
        asin: attempt.asin,
        title: attempt.title,
        current_price,
        current_price_numeric,
        list_price: attempt.list_price,
        list_price_numeric,
        discount_amount: discount.map(|(amount, _)| amount),
        discount_percentage: discount.map(|(_, pct)| pct),
        availability: attempt.availability,
        prime_eligible: attempt.prime_eligible,
        seller: attempt.seller,
        buy_box_price: attempt.buy_box_price,
        url: attempt.url,
        scraped_at: captured_at.to_rfc3339(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PriceCandidate;
    use chrono::TimeZone;

    fn attempt(current: Option<&str>, list: Option<&str>) -> ExtractionAttempt {
        ExtractionAttempt {
            asin: "B08N5WRWNW".to_string(),
            url: "https://www.amazon.com/dp/B08N5WRWNW".to_string(),
            price_candidates: current
                .map(|text| PriceCandidate { strategy: "buy_box", text: text.to_string() })
                .into_iter()
                .collect(),
            list_price: list.map(str::to_string),
            availability: Some("Only 3 left in stock - order soon.".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("$49.99"), Some(49.99));
        assert_eq!(parse_price("$1,299.00"), Some(1299.0));
        assert_eq!(parse_price("49."), Some(49.0));
        assert_eq!(parse_price("USD 7"), Some(7.0));
        assert_eq!(parse_price("See price in cart"), None);
        assert_eq!(parse_price("$10.99 - $20.99"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("."), None);
    }

    #[test]
    fn test_discount_scenario() {
        let record = normalize(attempt(Some("$49.99"), Some("$59.99")));
        assert_eq!(record.current_price_numeric, Some(49.99));
        assert_eq!(record.list_price_numeric, Some(59.99));
        assert_eq!(record.discount_amount, Some(10.0));
        assert_eq!(record.discount_percentage, Some(16.7));
        assert!(record.is_success());
    }

    #[test]
    fn test_only_current_price() {
        let record = normalize(attempt(Some("$49.99"), None));
        assert_eq!(record.current_price.as_deref(), Some("$49.99"));
        assert_eq!(record.current_price_numeric, Some(49.99));
        assert!(record.list_price.is_none());
        assert!(record.list_price_numeric.is_none());
        assert!(record.discount_amount.is_none());
        assert!(record.discount_percentage.is_none());
    }

    #[test]
    fn test_no_discount_when_list_not_greater() {
        assert_eq!(derive_discount(Some(59.99), Some(59.99)), None);
        assert_eq!(derive_discount(Some(59.99), Some(49.99)), None);
        assert_eq!(derive_discount(None, Some(49.99)), None);
        assert_eq!(derive_discount(Some(49.99), None), None);
    }

    #[test]
    fn test_discount_never_negative_and_percentage_matches_amount() {
        let pairs = [(0.01, 0.02), (19.99, 20.0), (3.5, 100.0), (123.45, 999.99), (0.0, 5.0)];
        for (current, list) in pairs {
            let (amount, pct) = derive_discount(Some(current), Some(list)).unwrap();
            assert!(amount >= 0.0);
            assert_eq!(pct, round_to(amount / list * 100.0, 1));
        }
    }

    #[test]
    fn test_unparseable_price_keeps_text() {
        let record = normalize(attempt(Some("Currently unavailable"), Some("$59.99")));
        assert_eq!(record.current_price.as_deref(), Some("Currently unavailable"));
        assert!(record.current_price_numeric.is_none());
        assert!(record.discount_amount.is_none());
    }

    #[test]
    fn test_timestamp_and_passthrough_fields() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let record = normalize_at(attempt(Some("$5.00"), None), at);
        assert_eq!(record.scraped_at, "2024-05-01T10:00:00+00:00");
        assert_eq!(record.availability.as_deref(), Some("Only 3 left in stock - order soon."));
        assert!(record.prime_eligible.is_none());
    }
}
