//! A loaded product page: parsed DOM plus lazily decoded JSON-LD.

use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use scraper::{Html, Selector};
use serde_json::Value;

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[type='application/ld+json']").unwrap());

#[derive(Debug)]
pub struct PageHandle {
    pub asin: String,
    /// Canonical URL requested for the ASIN.
    pub url: String,
    /// Where the browser ended up after redirects.
    pub final_url: String,
    document: Html,
    product: OnceCell<Option<Value>>,
}

impl PageHandle {
    pub fn new(
        asin: impl Into<String>,
        url: impl Into<String>,
        final_url: impl Into<String>,
        html: &str,
    ) -> Self {
        Self {
            asin: asin.into(),
            url: url.into(),
            final_url: final_url.into(),
            document: Html::parse_document(html),
            product: OnceCell::new(),
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Whitespace-collapsed text of the first element matching `selector`,
    /// or `None` when missing or empty.
    pub fn text_of(&self, selector: &Selector) -> Option<String> {
        self.document
            .select(selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .filter(|text| !text.is_empty())
    }

    pub fn has(&self, selector: &Selector) -> bool {
        self.document.select(selector).next().is_some()
    }

    /// The schema.org `Product` object embedded as JSON-LD, if any.
    pub fn structured_product(&self) -> Option<&Value> {
        self.product
            .get_or_init(|| {
                extract_schema_org(&self.document)
                    .into_iter()
                    .find_map(find_product)
            })
            .as_ref()
    }

    /// First entry of `offers` (object or array) on the product.
    pub fn structured_offer(&self) -> Option<&Value> {
        match self.structured_product()?.get("offers")? {
            Value::Array(offers) => offers.first(),
            offer @ Value::Object(_) => Some(offer),
            _ => None,
        }
    }
}

/// Every parseable JSON-LD block on the page.
pub fn extract_schema_org(document: &Html) -> Vec<Value> {
    document
        .select(&LD_JSON)
        .filter_map(|el| {
            let json_text = el.text().collect::<String>();
            serde_json::from_str(json_text.trim()).ok()
        })
        .collect()
}

fn find_product(value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.into_iter().find_map(find_product),
        Value::Object(mut map) => {
            if is_product_type(map.get("@type")) {
                return Some(Value::Object(map));
            }
            map.remove("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn is_product_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
