use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_millis, to_i64, to_millis, to_u64},
    models::{NewWatchEntry, WatchClassification, WatchEntry, WatchStats},
};

fn row_to_watch_entry(row: &Row) -> Result<WatchEntry> {
    let classification: String = row.get("classification")?;
    let watched_at: i64 = row.get("watched_at")?;

    Ok(WatchEntry {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        content_id: row.get("content_id")?,
        title: row.get("title")?,
        channel_name: row.get("channel_name")?,
        channel_id: row.get("channel_id")?,
        classification: WatchClassification::parse(&classification)?,
        reason: row.get("reason")?,
        watched_at: from_millis(watched_at, "watched_at")?,
    })
}

impl Database {
    /// Append one ledger row. Rows are never updated or deleted.
    pub async fn log_watch(&self, entry: NewWatchEntry) -> Result<WatchEntry> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO watch_history (device_id, content_id, title, channel_name, channel_id, classification, reason, watched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.device_id,
                    entry.content_id,
                    entry.title,
                    entry.channel_name,
                    entry.channel_id,
                    entry.classification.as_str(),
                    entry.reason,
                    to_millis(entry.watched_at),
                ],
            )?;

            Ok(WatchEntry {
                id: conn.last_insert_rowid(),
                device_id: entry.device_id,
                content_id: entry.content_id,
                title: entry.title,
                channel_name: entry.channel_name,
                channel_id: entry.channel_id,
                classification: entry.classification,
                reason: entry.reason,
                watched_at: entry.watched_at,
            })
        })
        .await
    }

    /// Newest-first history for a device, optionally bounded below by `since`.
    pub async fn get_watch_history(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<WatchEntry>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let mut query = String::from(
                "SELECT id, device_id, content_id, title, channel_name, channel_id, classification, reason, watched_at
                 FROM watch_history
                 WHERE device_id = ?",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(device_id)];

            if let Some(since) = since {
                query.push_str(" AND watched_at >= ?");
                params_vec.push(Box::new(to_millis(since)));
            }

            query.push_str(" ORDER BY watched_at DESC, id DESC LIMIT ?");
            params_vec.push(Box::new(to_i64(u64::from(limit))?));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut history = Vec::new();
            while let Some(row) = rows.next()? {
                history.push(row_to_watch_entry(row)?);
            }

            Ok(history)
        })
        .await
    }

    pub async fn get_watch_stats(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<WatchStats> {
        let device_id = device_id.to_string();
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        self.execute(move |conn| {
            let (total, allowed, blocked): (i64, i64, i64) = conn
                .query_row(
                    "SELECT
                         COUNT(*),
                         COALESCE(SUM(CASE WHEN classification = 'allowed' THEN 1 ELSE 0 END), 0),
                         COALESCE(SUM(CASE WHEN classification = 'blocked' THEN 1 ELSE 0 END), 0)
                     FROM watch_history
                     WHERE device_id = ?1 AND watched_at >= ?2",
                    params![device_id, since_ms],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|err| anyhow!("failed to aggregate watch history: {err}"))?;

            Ok(WatchStats {
                total: to_u64(total, "total")?,
                allowed: to_u64(allowed, "allowed")?,
                blocked: to_u64(blocked, "blocked")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(device: &str, content: &str, allowed: bool, at: DateTime<Utc>) -> NewWatchEntry {
        NewWatchEntry {
            device_id: device.to_string(),
            content_id: content.to_string(),
            title: format!("title {content}"),
            channel_name: "Channel".to_string(),
            channel_id: None,
            classification: WatchClassification::from_allowed(allowed),
            reason: (!allowed).then(|| "not for kids".to_string()),
            watched_at: at,
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_bounded() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();

        for i in 0..5 {
            db.log_watch(entry("d1", &format!("v{i}"), true, base + Duration::minutes(i)))
                .await
                .unwrap();
        }
        db.log_watch(entry("d2", "other", true, base)).await.unwrap();

        let history = db.get_watch_history("d1", None, 3).await.unwrap();
        let ids: Vec<_> = history.iter().map(|e| e.content_id.as_str()).collect();
        assert_eq!(ids, vec!["v4", "v3", "v2"]);

        let since = db
            .get_watch_history("d1", Some(base + Duration::minutes(3)), 100)
            .await
            .unwrap();
        assert_eq!(since.len(), 2);
    }

    #[tokio::test]
    async fn stats_split_by_classification() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();

        db.log_watch(entry("d1", "a", true, base - Duration::days(2)))
            .await
            .unwrap();
        db.log_watch(entry("d1", "b", false, base)).await.unwrap();
        db.log_watch(entry("d1", "c", true, base)).await.unwrap();

        let all = db.get_watch_stats("d1", None).await.unwrap();
        assert_eq!(
            all,
            WatchStats {
                total: 3,
                allowed: 2,
                blocked: 1
            }
        );

        let recent = db
            .get_watch_stats("d1", Some(base - Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(recent.total, 2);

        let empty = db.get_watch_stats("nobody", None).await.unwrap();
        assert_eq!(empty, WatchStats::default());
    }
}
