use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

use crate::error::ValidationError;

static ASIN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{10}$").unwrap());

/// Amazon Standard Identification Number, validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asin(String);

impl Asin {
    /// Trims and upper-cases `raw`, then checks the 10-character format.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let candidate = canonical(raw);
        if ASIN_PATTERN.is_match(&candidate) {
            Ok(Self(candidate))
        } else {
            Err(ValidationError { raw: raw.to_string() })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Drops blank entries and repeats, keeping first-seen order.
///
/// Entries are compared in canonical form, so `" b0abc12345"` and
/// `"B0ABC12345"` collapse into one. The first spelling is kept, trimmed of
/// surrounding whitespace. Malformed entries are kept: they still get a record
/// carrying the validation error.
pub fn dedup_identifiers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(canonical(s)))
        .collect()
}

/// `true` for a column header such as `ASIN` or `asin list`: starts with
/// "asin" in any case and is not itself a well-formed identifier.
pub fn is_header_label(entry: &str) -> bool {
    let entry = entry.trim();
    entry.to_ascii_lowercase().starts_with("asin") && Asin::parse(entry).is_err()
}

/// Identifier to put on a record: the canonical ASIN when `raw` is valid,
/// otherwise the entry as given.
pub fn record_id(raw: &str) -> String {
    Asin::parse(raw)
        .map(|asin| asin.0)
        .unwrap_or_else(|_| raw.to_string())
}
