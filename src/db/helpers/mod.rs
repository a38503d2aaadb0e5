use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_millis(value: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .ok_or_else(|| anyhow!("{field} holds out-of-range timestamp {value}"))
}

pub fn from_optional_millis(value: Option<i64>, field: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| from_millis(raw, field)).transpose()
}

/// Lifts a conversion error into the rusqlite error space so it can be
/// returned from `query_map` closures.
pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_timestamps_are_rejected() {
        assert!(from_millis(i64::MAX, "expires_at").is_err());
        assert!(from_optional_millis(None, "expires_at").unwrap().is_none());
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(to_u64(-1, "limit").is_err());
        assert_eq!(to_u64(7, "limit").unwrap(), 7);
    }
}
