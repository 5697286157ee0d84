//! Field extraction from a loaded product page.
//!
//! Each field has an ordered chain of named strategies. A strategy is a pure
//! function over the page; the first one returning `Some` wins. Reordering or
//! adding a location is a change to a chain table, nothing else.

use once_cell::sync::Lazy;
use scraper::Selector;
use serde_json::Value;
use tracing::debug;

use crate::page::{collapse_whitespace, PageHandle};
use crate::record::{ExtractionAttempt, PriceCandidate};

pub struct Strategy<T> {
    pub name: &'static str,
    pub lookup: fn(&PageHandle) -> Option<T>,
}

macro_rules! css {
    ($($name:ident = $sel:literal;)*) => {
        $(static $name: Lazy<Selector> = Lazy::new(|| Selector::parse($sel).unwrap());)*
    };
}

css! {
    APEX_PRICE_TO_PAY = "#apex_desktop .apexPriceToPay .a-offscreen, span.a-price.apexPriceToPay .a-offscreen";
    CORE_PRICE = "#corePrice_feature_div .a-price:not([data-a-strike]) .a-offscreen";
    PRICE_INSIDE_BUYBOX = "#price_inside_buybox";
    BUYBOX_PRICE = "#buybox .a-price:not([data-a-strike]) .a-offscreen";
    PRICEBLOCK_OUR = "#priceblock_ourprice";
    PRICEBLOCK_DEAL = "#priceblock_dealprice";
    PRICEBLOCK_SALE = "#priceblock_saleprice";
    CORE_PRICE_DISPLAY = "#corePriceDisplay_desktop_feature_div .a-price:not([data-a-strike]) .a-offscreen";
    ANY_PRICE = ".a-price:not([data-a-strike]):not(.a-text-price) .a-offscreen";
    STRIKE_PRICE = ".a-price[data-a-strike='true'] .a-offscreen";
    LIST_PRICE = "#listPrice";
    BASIS_PRICE = ".basisPrice .a-offscreen";
    PRODUCT_TITLE = "#productTitle";
    AVAILABILITY = "#availability";
    SELLER = "#sellerProfileTriggerId";
    PRIME_BADGE = "i.a-icon-prime, [data-csa-c-content-id='prime-logo']";
}

pub static CURRENT_PRICE_CHAIN: &[Strategy<String>] = &[
    Strategy { name: "structured_offer", lookup: structured_offer_price },
    Strategy { name: "buy_box", lookup: buy_box_price },
    Strategy { name: "legacy_price_block", lookup: legacy_price_block },
    Strategy { name: "core_price_display", lookup: core_price_display },
];

pub static LIST_PRICE_CHAIN: &[Strategy<String>] = &[
    Strategy { name: "structured_list_price", lookup: structured_list_price },
    Strategy { name: "strikethrough", lookup: strikethrough_price },
    Strategy { name: "list_price_block", lookup: list_price_block },
];

pub static BUY_BOX_CHAIN: &[Strategy<String>] = &[
    Strategy { name: "price_inside_buybox", lookup: |p| price_at(p, &[&PRICE_INSIDE_BUYBOX]) },
    Strategy { name: "buybox_block", lookup: |p| price_at(p, &[&BUYBOX_PRICE]) },
];

pub static TITLE_CHAIN: &[Strategy<String>] = &[
    Strategy {
        name: "structured_name",
        lookup: |p| structured_str(p.structured_product()?, "name"),
    },
    Strategy { name: "product_title", lookup: |p| p.text_of(&PRODUCT_TITLE) },
];

pub static AVAILABILITY_CHAIN: &[Strategy<String>] = &[
    Strategy { name: "structured_availability", lookup: structured_availability },
    Strategy { name: "availability_block", lookup: |p| p.text_of(&AVAILABILITY) },
];

pub static SELLER_CHAIN: &[Strategy<String>] = &[
    Strategy { name: "structured_seller", lookup: structured_seller },
    Strategy { name: "seller_profile", lookup: |p| p.text_of(&SELLER) },
];

pub static PRIME_CHAIN: &[Strategy<bool>] = &[
    Strategy { name: "structured_prime", lookup: structured_prime },
    Strategy { name: "prime_badge", lookup: |p| p.has(&PRIME_BADGE).then_some(true) },
];

/// First successful strategy in `chain`, with its name.
pub fn first_match<T>(chain: &[Strategy<T>], page: &PageHandle) -> Option<(&'static str, T)> {
    chain.iter().find_map(|s| (s.lookup)(page).map(|v| (s.name, v)))
}

fn pick<T: std::fmt::Debug>(field: &str, chain: &[Strategy<T>], page: &PageHandle) -> Option<T> {
    let found = first_match(chain, page);
    match &found {
        Some((strategy, value)) => {
            debug!(asin = %page.asin, field, strategy, ?value, "field extracted")
        }
        None => debug!(asin = %page.asin, field, "field not found"),
    }
    found.map(|(_, v)| v)
}

/// Reads every field off the page. Never fails; missing fields stay `None`.
pub fn extract(page: &PageHandle) -> ExtractionAttempt {
    let price_candidates: Vec<PriceCandidate> = CURRENT_PRICE_CHAIN
        .iter()
        .filter_map(|s| (s.lookup)(page).map(|text| PriceCandidate { strategy: s.name, text }))
        .collect();

    if let Some(winner) = price_candidates.first() {
        debug!(
            asin = %page.asin,
            strategy = winner.strategy,
            candidates = price_candidates.len(),
            "current price extracted"
        );
    }

    ExtractionAttempt {
        asin: page.asin.clone(),
        url: page.url.clone(),
        title: pick("title", TITLE_CHAIN, page),
        price_candidates,
        list_price: pick("list_price", LIST_PRICE_CHAIN, page),
        buy_box_price: pick("buy_box_price", BUY_BOX_CHAIN, page),
        availability: pick("availability", AVAILABILITY_CHAIN, page),
        seller: pick("seller", SELLER_CHAIN, page),
        prime_eligible: pick("prime_eligible", PRIME_CHAIN, page),
        structured_data: page.structured_product().cloned(),
    }
}

// ============================================================================
// DOM strategies
// ============================================================================

/// First selector yielding text with at least one digit.
fn price_at(page: &PageHandle, selectors: &[&Lazy<Selector>]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|sel| page.text_of(sel))
        .find(|text| text.chars().any(|c| c.is_ascii_digit()))
}

fn buy_box_price(page: &PageHandle) -> Option<String> {
    price_at(page, &[&APEX_PRICE_TO_PAY, &CORE_PRICE, &PRICE_INSIDE_BUYBOX])
}

fn legacy_price_block(page: &PageHandle) -> Option<String> {
    price_at(page, &[&PRICEBLOCK_OUR, &PRICEBLOCK_DEAL, &PRICEBLOCK_SALE])
}

fn core_price_display(page: &PageHandle) -> Option<String> {
    price_at(page, &[&CORE_PRICE_DISPLAY, &ANY_PRICE])
}

fn strikethrough_price(page: &PageHandle) -> Option<String> {
    price_at(page, &[&STRIKE_PRICE])
}

fn list_price_block(page: &PageHandle) -> Option<String> {
    price_at(page, &[&LIST_PRICE, &BASIS_PRICE])
}

// ============================================================================
// Structured data (JSON-LD) strategies
// ============================================================================

fn structured_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn structured_offer_price(page: &PageHandle) -> Option<String> {
    let offer = page.structured_offer()?;
    let price = offer.get("price").or_else(|| offer.get("lowPrice"))?;
    format_price(price, offer.get("priceCurrency").and_then(Value::as_str))
}

fn structured_list_price(page: &PageHandle) -> Option<String> {
    let offer = page.structured_offer()?;
    let currency = offer.get("priceCurrency").and_then(Value::as_str);
    let specs = match offer.get("priceSpecification")? {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        spec => vec![spec],
    };
    specs.into_iter().find_map(|spec| {
        let kind = spec.get("priceType")?.as_str()?;
        if !(kind.contains("ListPrice") || kind.contains("StrikethroughPrice")) {
            return None;
        }
        let currency = spec.get("priceCurrency").and_then(Value::as_str).or(currency);
        format_price(spec.get("price")?, currency)
    })
}

fn structured_availability(page: &PageHandle) -> Option<String> {
    let raw = structured_str(page.structured_offer()?, "availability")?;
    let trimmed = raw
        .trim_start_matches("https://schema.org/")
        .trim_start_matches("http://schema.org/");
    Some(trimmed.to_string())
}

fn structured_seller(page: &PageHandle) -> Option<String> {
    match page.structured_offer()?.get("seller")? {
        Value::String(name) => Some(collapse_whitespace(name)).filter(|s| !s.is_empty()),
        seller => structured_str(seller, "name"),
    }
}

fn structured_prime(page: &PageHandle) -> Option<bool> {
    let offer = page.structured_offer()?;
    ["isPrimeEligible", "primeEligible"]
        .iter()
        .find_map(|key| offer.get(*key).and_then(Value::as_bool))
}

/// Renders a JSON-LD price (number or string) as display text.
fn format_price(price: &Value, currency: Option<&str>) -> Option<String> {
    let amount = match price {
        Value::Number(n) => format!("{:.2}", n.as_f64()?),
        Value::String(s) if s.chars().any(|c| c.is_ascii_digit()) => s.trim().to_string(),
        _ => return None,
    };
    if amount.starts_with(|c: char| !c.is_ascii_digit() && c != '.') {
        return Some(amount);
    }
    let prefix = match currency.unwrap_or("USD") {
        "USD" | "CAD" | "AUD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        other => format!("{} ", other),
    };
    Some(format!("{}{}", prefix, amount))
}
