//! Watch ledger entries and aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use anyhow::{anyhow, Result};

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchClassification {
    Allowed,
    Blocked,
}

impl WatchClassification {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            WatchClassification::Allowed
        } else {
            WatchClassification::Blocked
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchClassification::Allowed => "allowed",
            WatchClassification::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "allowed" => Ok(WatchClassification::Allowed),
            "blocked" => Ok(WatchClassification::Blocked),
            other => Err(anyhow!("unknown watch classification {other}")),
        }
    }
}

/// Ledger row before the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewWatchEntry {
    pub device_id: String,
    pub content_id: String,
    pub title: String,
    pub channel_name: String,
    pub channel_id: Option<String>,
    pub classification: WatchClassification,
    pub reason: Option<String>,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchEntry {
    pub id: i64,
    pub device_id: String,
    pub content_id: String,
    pub title: String,
    pub channel_name: String,
    pub channel_id: Option<String>,
    pub classification: WatchClassification,
    pub reason: Option<String>,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchStats {
    pub total: u64,
    pub allowed: u64,
    pub blocked: u64,
}
