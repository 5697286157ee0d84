//! Extraction data model: the transient per-page attempt and the durable record.

use serde::{Deserialize, Serialize};

/// One price text found on the page and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub strategy: &'static str,
    pub text: String,
}

/// Raw strategy outputs for one loaded page. Consumed by the normalizer,
/// never persisted.
#[derive(Debug, Clone, Default)]
pub struct ExtractionAttempt {
    pub asin: String,
    pub url: String,
    pub title: Option<String>,
    /// Every non-empty current-price result, in chain order. The first wins.
    pub price_candidates: Vec<PriceCandidate>,
    pub list_price: Option<String>,
    pub buy_box_price: Option<String>,
    pub availability: Option<String>,
    pub seller: Option<String>,
    pub prime_eligible: Option<bool>,
    pub structured_data: Option<serde_json::Value>,
}

impl ExtractionAttempt {
    pub fn current_price(&self) -> Option<&str> {
        self.price_candidates.first().map(|c| c.text.as_str())
    }
}

/// Normalized output row. Exactly one per input identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub asin: String,
    pub title: Option<String>,
    pub current_price: Option<String>,
    pub current_price_numeric: Option<f64>,
    pub list_price: Option<String>,
    pub list_price_numeric: Option<f64>,
    pub discount_amount: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub availability: Option<String>,
    pub prime_eligible: Option<bool>,
    pub seller: Option<String>,
    pub buy_box_price: Option<String>,
    pub url: String,
    /// RFC 3339 / ISO-8601, UTC.
    pub scraped_at: String,
    pub error: Option<String>,
}

impl PriceRecord {
    /// Failure variant: identifier, url, timestamp and error only.
    pub fn failure(
        asin: impl Into<String>,
        url: impl Into<String>,
        scraped_at: String,
        error: impl Into<String>,
    ) -> Self {
        Self {
            asin: asin.into(),
            title: None,
            current_price: None,
            current_price_numeric: None,
            list_price: None,
            list_price_numeric: None,
            discount_amount: None,
            discount_percentage: None,
            availability: None,
            prime_eligible: None,
            seller: None,
            buy_box_price: None,
            url: url.into(),
            scraped_at,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
