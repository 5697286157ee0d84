//! Loads one product page and classifies what came back.

use std::time::Duration;

use tracing::{debug, warn};

use crate::asin::Asin;
use crate::error::NavigationError;
use crate::page::PageHandle;

pub const DEFAULT_MARKETPLACE: &str = "https://www.amazon.com";

/// Element present on every rendered product detail page.
pub const READY_SELECTOR: &str = "#dp-container";

const BLOCK_URL_MARKERS: &[&str] = &["/errors/validateCaptcha", "/ap/signin", "/captcha"];

const BLOCK_CONTENT_MARKERS: &[&str] = &[
    "Enter the characters you see below",
    "Type the characters you see in this image",
    "To discuss automated access to Amazon data please contact",
    "api-services-support@amazon.com",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "Sorry! We couldn't find that page",
    "Looking for something?",
    "The Web address you entered is not a functioning page on our site",
];

/// The browser operations navigation needs. Implemented by
/// [`crate::session::Session`]; tests provide scripted pages.
pub trait PageDriver {
    /// Starts loading `url` and waits for the load event.
    fn open(&self, url: &str) -> anyhow::Result<()>;
    /// `true` once `selector` is present, `false` if `timeout` elapses first.
    fn wait_for(&self, selector: &str, timeout: Duration) -> bool;
    fn current_url(&self) -> String;
    fn content(&self) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct Navigator {
    base_url: String,
    timeout: Duration,
}

impl Navigator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Canonical detail-page URL. Raw text is percent-encoded so malformed
    /// identifiers still produce a well-formed URL for their error record.
    pub fn product_url(&self, raw_id: &str) -> String {
        format!("{}/dp/{}", self.base_url, urlencoding::encode(raw_id))
    }

    pub fn navigate<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        asin: &Asin,
    ) -> Result<PageHandle, NavigationError> {
        let url = self.product_url(asin.as_str());
        debug!(%asin, %url, "navigating");

        driver.open(&url).map_err(|e| NavigationError::Driver {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let ready = driver.wait_for(READY_SELECTOR, self.timeout);
        let final_url = driver.current_url();
        let html = driver.content().map_err(|e| NavigationError::Driver {
            url: url.clone(),
            message: e.to_string(),
        })?;

        // Page text is only trusted for classification when the product
        // container never rendered; reviews may quote the same phrases.
        if is_blocked_url(&final_url) || (!ready && is_blocked_content(&html)) {
            warn!(%asin, %final_url, "🛑 anti-bot page detected");
            return Err(NavigationError::Blocked { url });
        }
        if !ready {
            if is_not_found(&html) {
                return Err(NavigationError::NotFound { url });
            }
            return Err(NavigationError::Timeout {
                url,
                secs: self.timeout.as_secs(),
            });
        }

        Ok(PageHandle::new(asin.as_str(), url, final_url, &html))
    }
}

fn is_blocked_url(final_url: &str) -> bool {
    BLOCK_URL_MARKERS.iter().any(|m| final_url.contains(m))
}

fn is_blocked_content(html: &str) -> bool {
    BLOCK_CONTENT_MARKERS.iter().any(|m| html.contains(m))
}

fn is_not_found(html: &str) -> bool {
    NOT_FOUND_MARKERS.iter().any(|m| html.contains(m))
}
