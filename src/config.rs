//! Environment-driven configuration (`.env` is honoured through dotenv).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::batch::{BatchConfig, DelayWindow};
use crate::error::ConfigError;
use crate::navigator::{Navigator, DEFAULT_MARKETPLACE};
use crate::session::SessionConfig;
use crate::sheets::CREDENTIALS_ENV;

const DEFAULT_NAV_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTPUT: &str = "./results/";

const SHEET_URL_PREFIX: &str = "https://docs.google.com/spreadsheets/d/";

/// Where identifiers come from or records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    S3 {
        bucket: String,
        key: String,
    },
    /// Identifiers are read from `column`; results always fill columns A-I.
    Sheet {
        spreadsheet_id: String,
        worksheet: Option<String>,
        column: String,
    },
    Local(PathBuf),
}

impl Location {
    /// One of:
    /// - `s3://bucket/key` (the key may be empty for an output prefix)
    /// - `sheets://{spreadsheet_id}[/{worksheet}][!{column}]`
    /// - a Google Sheets URL (first worksheet, column A)
    /// - a filesystem path
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let invalid = || ConfigError::Location(raw.to_string());
        if raw.is_empty() {
            return Err(invalid());
        }

        if let Some(rest) = raw.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(invalid());
            }
            return Ok(Location::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix(SHEET_URL_PREFIX) {
            let id = rest.split(['/', '?', '#']).next().unwrap_or_default();
            return sheet(id, None, "A").ok_or_else(invalid);
        }

        if let Some(rest) = raw.strip_prefix("sheets://") {
            let (target, column) = rest.rsplit_once('!').unwrap_or((rest, "A"));
            let (id, worksheet) = match target.split_once('/') {
                Some((id, name)) if !name.is_empty() => (id, Some(name)),
                Some((id, _)) => (id, None),
                None => (target, None),
            };
            return sheet(id, worksheet, column).ok_or_else(invalid);
        }

        Ok(Location::Local(PathBuf::from(raw)))
    }
}

fn sheet(id: &str, worksheet: Option<&str>, column: &str) -> Option<Location> {
    let column_ok =
        (1..=3).contains(&column.len()) && column.chars().all(|c| c.is_ascii_alphabetic());
    if id.is_empty() || !column_ok {
        return None;
    }
    Some(Location::Sheet {
        spreadsheet_id: id.to_string(),
        worksheet: worksheet.map(str::to_string),
        column: column.to_ascii_uppercase(),
    })
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            Location::Sheet {
                spreadsheet_id,
                worksheet,
                column,
            } => write!(
                f,
                "sheets://{}/{}!{}",
                spreadsheet_id,
                worksheet.as_deref().unwrap_or_default(),
                column
            ),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub batch: BatchConfig,
    pub marketplace_url: String,
    pub nav_timeout: Duration,
    pub source: Location,
    pub target: Location,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let source = match non_empty(&get, "ASIN_SOURCE") {
            Some(raw) => Location::parse(&raw)?,
            None => return Err(ConfigError::Missing("ASIN_SOURCE")),
        };
        if matches!(&source, Location::S3 { key, .. } if key.is_empty()) {
            return Err(ConfigError::Location(source.to_string()));
        }
        let target = match non_empty(&get, "OUTPUT_TARGET") {
            Some(raw) => Location::parse(&raw)?,
            None => Location::parse(DEFAULT_OUTPUT)?,
        };
        let uses_sheets = [&source, &target]
            .iter()
            .any(|l| matches!(l, Location::Sheet { .. }));
        if uses_sheets && non_empty(&get, CREDENTIALS_ENV).is_none() {
            return Err(ConfigError::Missing(CREDENTIALS_ENV));
        }

        let delay = DelayWindow::new(
            number(&get, "MIN_DELAY", DelayWindow::default().min_secs()),
            number(&get, "MAX_DELAY", DelayWindow::default().max_secs()),
        )?;
        let batch = BatchConfig {
            delay,
            blocked_cooldown: non_empty(&get, "BLOCKED_COOLDOWN_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            ..Default::default()
        };

        Ok(Self {
            session: session_from_lookup(&get),
            batch,
            marketplace_url: marketplace_from_lookup(&get),
            nav_timeout: nav_timeout_from_lookup(&get),
            source,
            target,
        })
    }

    pub fn navigator(&self) -> Navigator {
        Navigator::new(self.marketplace_url.clone(), self.nav_timeout)
    }
}

/// Browser settings only, for tools that do not run a batch.
pub fn session_from_env() -> SessionConfig {
    dotenv::dotenv().ok();
    session_from_lookup(&|key: &str| env::var(key).ok())
}

pub fn navigator_from_env() -> Navigator {
    dotenv::dotenv().ok();
    let get = |key: &str| env::var(key).ok();
    Navigator::new(marketplace_from_lookup(&get), nav_timeout_from_lookup(&get))
}

fn session_from_lookup(get: &impl Fn(&str) -> Option<String>) -> SessionConfig {
    let defaults = SessionConfig::default();
    SessionConfig {
        headless: non_empty(get, "HEADLESS")
            .map(|v| parse_bool(&v, defaults.headless))
            .unwrap_or(defaults.headless),
        proxy: non_empty(get, "PROXY"),
        user_agent: non_empty(get, "USER_AGENT"),
        chrome_path: non_empty(get, "CHROME_PATH").map(PathBuf::from),
        ..defaults
    }
}

fn marketplace_from_lookup(get: &impl Fn(&str) -> Option<String>) -> String {
    non_empty(get, "MARKETPLACE_URL").unwrap_or_else(|| DEFAULT_MARKETPLACE.to_string())
}

fn nav_timeout_from_lookup(get: &impl Fn(&str) -> Option<String>) -> Duration {
    let secs = number(get, "NAV_TIMEOUT_SECS", DEFAULT_NAV_TIMEOUT_SECS as f64);
    if secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs(DEFAULT_NAV_TIMEOUT_SECS)
    }
}

fn non_empty(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Unparseable numbers fall back to `default`. Range checks belong to the
/// consumer.
fn number(get: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    match non_empty(get, key) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!("{}={:?} is not a number, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
