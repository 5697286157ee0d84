//! Error taxonomy for the pricing pipeline.
//!
//! Only [`SessionError`] is fatal to a batch. Everything else is downgraded
//! to an `error` string on the record for that ASIN.

use thiserror::Error;

/// Identifier rejected before navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ASIN {raw:?}: expected 10 uppercase letters or digits")]
pub struct ValidationError {
    pub raw: String,
}

/// Browser could not be started or configured. Aborts the batch.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch browser: {0}")]
    Launch(#[source] anyhow::Error),
    #[error("failed to open tab: {0}")]
    Tab(#[source] anyhow::Error),
    #[error("invalid proxy {proxy:?}: {reason}")]
    Proxy { proxy: String, reason: String },
}

/// Per-item navigation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("timed out after {secs}s waiting for product page {url}")]
    Timeout { url: String, secs: u64 },
    #[error("blocked by anti-bot page at {url}")]
    Blocked { url: String },
    #[error("product not found at {url}")]
    NotFound { url: String },
    #[error("browser error loading {url}: {message}")]
    Driver { url: String, message: String },
}

impl NavigationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            NavigationError::Timeout { .. } => FailureKind::Timeout,
            NavigationError::Blocked { .. } => FailureKind::Blocked,
            NavigationError::NotFound { .. } => FailureKind::NotFound,
            NavigationError::Driver { .. } => FailureKind::Driver,
        }
    }
}

/// Why an item ended up in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Validation,
    Timeout,
    Blocked,
    NotFound,
    Driver,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid delay window [{min}, {max}]: bounds must be finite, non-negative and min <= max")]
    DelayWindow { min: f64, max: f64 },
    #[error("invalid location {0:?}: expected s3://bucket/key or a local path")]
    Location(String),
}
