//! Site registry records and hostname normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub domain: String,
    pub original_url: String,
    pub title: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Banned,
    Blocked,
    Clear,
}

/// Registry key for a URL: its hostname, or the raw input when it does not
/// parse as an absolute URL with a host.
pub fn normalize_domain(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}
