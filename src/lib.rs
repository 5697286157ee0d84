//! Product price extraction for Amazon detail pages.
//!
//! One hardened Chrome session walks a list of ASINs sequentially with
//! randomized pauses and emits exactly one [`record::PriceRecord`] per input.

pub mod asin;
pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod navigator;
pub mod normalize;
pub mod page;
pub mod proxy;
pub mod record;
pub mod session;
pub mod sheets;
pub mod sources;
pub mod stealth;
