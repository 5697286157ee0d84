//! Loads a single product page and dumps what every extraction strategy saw.
//!
//! Usage: `inspect_asin <ASIN>`. Set `HEADLESS=false` to watch the browser.

use anyhow::{anyhow, Context, Result};
use asin_pricer::asin::Asin;
use asin_pricer::config::{navigator_from_env, session_from_env};
use asin_pricer::extract::extract;
use asin_pricer::normalize::normalize;
use asin_pricer::session::Session;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let raw = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: inspect_asin <ASIN>"))?;
    let asin = Asin::parse(&raw)?;

    println!("🕵️ Inspecting {}...", asin);
    let session = Session::acquire(&session_from_env()).context("browser session")?;
    println!("User agent: {}", session.user_agent());

    let navigator = navigator_from_env();
    let page = navigator.navigate(&session, &asin)?;
    println!("Final URL: {}", page.final_url);
    println!("Structured product data: {}", page.structured_product().is_some());

    let attempt = extract(&page);
    for candidate in &attempt.price_candidates {
        println!("  price via {:<20} {}", candidate.strategy, candidate.text);
    }
    if attempt.price_candidates.is_empty() {
        println!("  no current-price strategy matched");
    }

    let record = normalize(attempt);
    println!("{}", serde_json::to_string_pretty(&record)?);

    session.release();
    Ok(())
}
