use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cached classifier verdicts older than this are treated as absent.
pub const CLASSIFICATION_TTL_HOURS: i64 = 24;

pub fn classification_ttl() -> Duration {
    Duration::hours(CLASSIFICATION_TTL_HOURS)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedClassification {
    pub content_id: String,
    pub allowed: bool,
    pub reason: String,
    pub classified_at: DateTime<Utc>,
}

impl CachedClassification {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.classified_at > classification_ttl()
    }
}
