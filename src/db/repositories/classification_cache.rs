use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, from_millis, to_millis},
    models::{classification_ttl, CachedClassification},
};

fn row_to_cached(row: &Row) -> Result<CachedClassification, rusqlite::Error> {
    let classified_at: i64 = row.get("classified_at")?;

    Ok(CachedClassification {
        content_id: row.get("content_id")?,
        allowed: row.get("allowed")?,
        reason: row.get("reason")?,
        classified_at: from_millis(classified_at, "classified_at").map_err(conversion_error)?,
    })
}

pub struct ClassificationCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ClassificationCacheRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Expired entries are deleted on the lookup that finds them.
    pub fn get(&self, content_id: &str, now: DateTime<Utc>) -> Result<Option<CachedClassification>> {
        let cached = self
            .conn
            .query_row(
                "SELECT content_id, allowed, reason, classified_at
                 FROM classification_cache
                 WHERE content_id = ?1",
                params![content_id],
                row_to_cached,
            )
            .optional()?;

        match cached {
            Some(entry) if entry.is_expired_at(now) => {
                self.conn.execute(
                    "DELETE FROM classification_cache WHERE content_id = ?1",
                    params![content_id],
                )?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn put(
        &self,
        content_id: &str,
        allowed: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CachedClassification> {
        self.conn.execute(
            "INSERT INTO classification_cache (content_id, allowed, reason, classified_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(content_id) DO UPDATE SET
                 allowed = excluded.allowed,
                 reason = excluded.reason,
                 classified_at = excluded.classified_at",
            params![content_id, allowed, reason, to_millis(now)],
        )?;

        Ok(CachedClassification {
            content_id: content_id.to_string(),
            allowed,
            reason: reason.to_string(),
            classified_at: now,
        })
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_millis(now - classification_ttl());
        let purged = self.conn.execute(
            "DELETE FROM classification_cache WHERE classified_at < ?1",
            params![cutoff],
        )?;
        Ok(purged)
    }
}

impl Database {
    pub async fn get_cached_classification(
        &self,
        content_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedClassification>> {
        let content_id = content_id.to_string();
        self.execute(move |conn| ClassificationCacheRepository::new(conn).get(&content_id, now))
            .await
    }

    pub async fn cache_classification(
        &self,
        content_id: &str,
        allowed: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CachedClassification> {
        let content_id = content_id.to_string();
        let reason = reason.to_string();
        self.execute(move |conn| {
            ClassificationCacheRepository::new(conn).put(&content_id, allowed, &reason, now)
        })
        .await
    }

    pub async fn purge_expired_classifications(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| ClassificationCacheRepository::new(conn).purge_expired(now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn entry_lives_exactly_one_ttl() {
        let db = Database::in_memory().unwrap();
        let t = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let ttl = classification_ttl();

        db.cache_classification("vid", false, "r", t).await.unwrap();

        let hit = db
            .get_cached_classification("vid", t + ttl - Duration::milliseconds(1))
            .await
            .unwrap()
            .unwrap();
        assert!(!hit.allowed);
        assert_eq!(hit.reason, "r");

        assert!(db
            .get_cached_classification("vid", t + ttl + Duration::milliseconds(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_lookup_purges_row() {
        let db = Database::in_memory().unwrap();
        let t = Utc::now();
        db.cache_classification("vid", true, "ok", t).await.unwrap();

        let late = t + classification_ttl() + Duration::minutes(1);
        assert!(db.get_cached_classification("vid", late).await.unwrap().is_none());

        // A lookup at the original time no longer finds it: the row is gone.
        assert!(db.get_cached_classification("vid", t).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_resets_classified_at() {
        let db = Database::in_memory().unwrap();
        let t = Utc::now();
        db.cache_classification("vid", false, "old", t).await.unwrap();

        let refreshed = t + Duration::hours(20);
        db.cache_classification("vid", true, "new", refreshed)
            .await
            .unwrap();

        let hit = db
            .get_cached_classification("vid", t + Duration::hours(30))
            .await
            .unwrap()
            .unwrap();
        assert!(hit.allowed);
        assert_eq!(hit.reason, "new");
    }

    #[tokio::test]
    async fn sweep_only_removes_expired_rows() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        db.cache_classification("old", true, "ok", now - Duration::hours(25))
            .await
            .unwrap();
        db.cache_classification("fresh", true, "ok", now - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(db.purge_expired_classifications(now).await.unwrap(), 1);
        assert!(db
            .get_cached_classification("fresh", now)
            .await
            .unwrap()
            .is_some());
    }
}
