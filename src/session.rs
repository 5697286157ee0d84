//! Browser session lifecycle: launch, harden, drive, release.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::navigator::PageDriver;
use crate::proxy::{write_proxy_auth_extension, ProxyEndpoint};

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    ]
});

const CHROME_FLAGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--disable-gpu",
    "--window-position=0,0",
    "--lang=en-US",
];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub proxy: Option<String>,
    /// Picked at random from the built-in pool when `None`.
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
    /// Upper bound for a single page load (CDP default timeout).
    pub page_load_timeout: Duration,
    pub timezone: String,
    pub locale: String,
    pub chrome_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            user_agent: None,
            window_size: (1920, 1080),
            page_load_timeout: Duration::from_secs(30),
            timezone: "America/New_York".to_string(),
            locale: "en-US".to_string(),
            chrome_path: None,
        }
    }
}

pub fn choose_user_agent(config: &SessionConfig, rng: &mut impl Rng) -> String {
    match &config.user_agent {
        Some(ua) if !ua.trim().is_empty() => ua.trim().to_string(),
        _ => USER_AGENTS
            .choose(rng)
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string(),
    }
}

/// Full Chrome argument list for a session.
pub fn chrome_args(
    config: &SessionConfig,
    user_agent: &str,
    proxy: Option<&ProxyEndpoint>,
    auth_extension: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = CHROME_FLAGS.iter().map(|f| f.to_string()).collect();
    args.push(format!("--user-agent={}", user_agent));
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = proxy {
        args.push(format!("--proxy-server={}", proxy.to_chrome_arg()));
    }
    if let Some(dir) = auth_extension {
        args.push(format!("--load-extension={}", dir.display()));
    }
    args
}

/// A running browser with one hardened tab. Dropping it closes the tab
/// and kills the browser process.
pub struct Session {
    tab: Arc<Tab>,
    user_agent: String,
    // Field order is drop order: tab, browser, then the auth extension files.
    _browser: Browser,
    _proxy_auth: Option<TempDir>,
}

impl Session {
    pub fn acquire(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::acquire_with_rng(config, &mut rand::thread_rng())
    }

    pub fn acquire_with_rng(
        config: &SessionConfig,
        rng: &mut impl Rng,
    ) -> Result<Self, SessionError> {
        let user_agent = choose_user_agent(config, rng);
        let proxy = config.proxy.as_deref().map(ProxyEndpoint::parse).transpose()?;

        let auth_extension = match proxy.as_ref().and_then(ProxyEndpoint::credentials) {
            Some((user, pass)) => {
                let dir = write_proxy_auth_extension(user, pass).map_err(|e| SessionError::Proxy {
                    proxy: config.proxy.clone().unwrap_or_default(),
                    reason: format!("cannot write auth extension: {}", e),
                })?;
                Some(dir)
            }
            None => None,
        };

        let extension_dir = auth_extension.as_ref().map(TempDir::path);
        let owned_args = chrome_args(config, &user_agent, proxy.as_ref(), extension_dir);
        let args: Vec<&OsStr> = owned_args.iter().map(|a| OsStr::new(a.as_str())).collect();

        if let Some(proxy) = &proxy {
            let auth = auth_extension.is_some();
            info!(proxy = %proxy.to_chrome_arg(), auth, "🔄 Using proxy");
        } else {
            debug!("No proxy configured, using direct connection");
        }

        let browser = Browser::new(LaunchOptions {
            // Headless is requested through `--headless=new` instead.
            headless: false,
            window_size: Some(config.window_size),
            path: config.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(3600),
            args,
            ..Default::default()
        })
        .map_err(SessionError::Launch)?;

        let tab = browser.new_tab().map_err(SessionError::Tab)?;
        tab.set_default_timeout(config.page_load_timeout);

        let languages = [config.locale.as_str(), "en"];
        let script = crate::stealth::stealth_script(rng, &languages);
        if let Err(e) = crate::stealth::harden_tab(&tab, script, &config.timezone, &config.locale) {
            warn!("Failed to apply stealth settings: {}", e);
        }

        info!(headless = config.headless, user_agent = %user_agent, "🌐 Browser session ready");
        Ok(Self {
            tab,
            user_agent,
            _browser: browser,
            _proxy_auth: auth_extension,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Explicit end of the session. Dropping has the same effect.
    pub fn release(self) {
        info!("Releasing browser session");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!("tab close on release failed: {}", e);
        }
    }
}

impl PageDriver for Session {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.tab.navigate_to(url)?;
        // A slow load event is not fatal; the readiness wait decides.
        if let Err(e) = self.tab.wait_until_navigated() {
            debug!(url, "load event not observed: {}", e);
        }
        Ok(())
    }

    fn wait_for(&self, selector: &str, timeout: Duration) -> bool {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .is_ok()
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn content(&self) -> anyhow::Result<String> {
        self.tab.get_content()
    }
}
