//! Batch input and output: identifier lists in, record files out.
//!
//! Either side is a local path, an S3 object or a Google Sheet. S3
//! credentials come from the default AWS provider chain, Sheets credentials
//! from a service account key.

use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::asin::is_header_label;
use crate::config::Location;
use crate::record::PriceRecord;
use crate::sheets;

async fn s3_client() -> aws_sdk_s3::Client {
    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    aws_sdk_s3::Client::new(&sdk_config)
}

pub struct IdentifierSource {
    location: Location,
}

impl IdentifierSource {
    pub fn new(location: Location) -> Self {
        Self { location }
    }

    /// Raw identifiers in file order. Validation and dedup happen in the batch.
    pub async fn load(&self) -> Result<Vec<String>> {
        let ids = match &self.location {
            Location::Local(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                parse_identifiers(&content, is_json_path(path))?
            }
            Location::S3 { bucket, key } => {
                let object = s3_client()
                    .await
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .with_context(|| format!("fetching s3://{}/{}", bucket, key))?;
                let bytes = object
                    .body
                    .collect()
                    .await
                    .context("reading S3 object body")?
                    .into_bytes();
                let content =
                    String::from_utf8(bytes.to_vec()).context("identifier list is not UTF-8")?;
                parse_identifiers(&content, true)?
            }
            Location::Sheet {
                spreadsheet_id,
                worksheet,
                column,
            } => sheets::load_identifiers(spreadsheet_id, worksheet.as_deref(), column)
                .await
                .with_context(|| format!("loading identifiers from {}", self.location))?,
        };
        info!("📥 Loaded {} identifiers from {}", ids.len(), self.location);
        Ok(ids)
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// JSON array of strings, or one identifier per line. Blank lines, `#`
/// comments and an `ASIN` header line are skipped in the line format.
pub fn parse_identifiers(content: &str, json: bool) -> Result<Vec<String>> {
    if json {
        return serde_json::from_str::<Vec<String>>(content)
            .context("expected a JSON array of strings");
    }
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !is_header_label(line))
        .map(str::to_string)
        .collect())
}

pub struct RecordSink {
    location: Location,
}

impl RecordSink {
    pub fn new(location: Location) -> Self {
        Self { location }
    }

    /// Writes all records and returns where they went: one pretty JSON array
    /// for files and S3, a results table for a sheet.
    pub async fn write(&self, records: &[PriceRecord], at: DateTime<Utc>) -> Result<String> {
        let body = serde_json::to_vec_pretty(records).context("serializing records")?;
        let destination = match &self.location {
            Location::Sheet {
                spreadsheet_id,
                worksheet,
                ..
            } => {
                sheets::write_records(spreadsheet_id, worksheet.as_deref(), records)
                    .await
                    .with_context(|| format!("writing results to {}", self.location))?;
                self.location.to_string()
            }
            Location::Local(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
                let path = dir.join(output_key("", at));
                tokio::fs::write(&path, &body)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                path.display().to_string()
            }
            Location::S3 { bucket, key: prefix } => {
                let key = output_key(prefix, at);
                s3_client()
                    .await
                    .put_object()
                    .bucket(bucket)
                    .key(&key)
                    .body(ByteStream::from(body))
                    .content_type("application/json")
                    .send()
                    .await
                    .with_context(|| format!("uploading s3://{}/{}", bucket, key))?;
                format!("s3://{}/{}", bucket, key)
            }
        };
        info!("💾 Saved {} records to {}", records.len(), destination);
        Ok(destination)
    }
}

/// `{prefix}amazon_pricing_{YYYYMMDDTHHMMSSZ}.json`
pub fn output_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}amazon_pricing_{}.json", prefix, at.format("%Y%m%dT%H%M%SZ"))
}
