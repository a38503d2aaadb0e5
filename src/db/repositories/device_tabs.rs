use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{from_millis, to_millis},
    models::{BrowserTab, DeviceTabs, PendingTabClose},
};

fn row_to_tab(row: &Row) -> Result<BrowserTab, rusqlite::Error> {
    Ok(BrowserTab {
        tab_id: row.get("tab_id")?,
        url: row.get("url")?,
        title: row.get("title")?,
    })
}

pub struct DeviceTabRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DeviceTabRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Swap the device's snapshot for `tabs`, keeping their order.
    pub fn replace_snapshot(
        &self,
        device_id: &str,
        tabs: &[BrowserTab],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM device_tabs WHERE device_id = ?1",
            params![device_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO device_tabs (device_id, position, tab_id, url, title)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, tab) in tabs.iter().enumerate() {
                insert.execute(params![
                    device_id,
                    position as i64,
                    tab.tab_id,
                    tab.url,
                    tab.title
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO device_tab_reports (device_id, reported_at)
             VALUES (?1, ?2)
             ON CONFLICT(device_id) DO UPDATE SET reported_at = excluded.reported_at",
            params![device_id, to_millis(now)],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn snapshot(&self, device_id: &str) -> Result<DeviceTabs> {
        let reported_at: Option<i64> = self
            .conn
            .query_row(
                "SELECT reported_at FROM device_tab_reports WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stmt = self.conn.prepare(
            "SELECT tab_id, url, title
             FROM device_tabs
             WHERE device_id = ?1
             ORDER BY position",
        )?;
        let tabs = stmt
            .query_map(params![device_id], row_to_tab)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DeviceTabs {
            device_id: device_id.to_string(),
            tabs,
            last_update: reported_at
                .map(|raw| from_millis(raw, "reported_at"))
                .transpose()?,
        })
    }

    /// Every device that has reported at least once, by device id.
    pub fn all_snapshots(&self) -> Result<Vec<DeviceTabs>> {
        let mut stmt = self
            .conn
            .prepare("SELECT device_id FROM device_tab_reports ORDER BY device_id")?;
        let devices = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        devices
            .iter()
            .map(|device_id| self.snapshot(device_id))
            .collect()
    }

    pub fn enqueue_close(
        &self,
        device_id: &str,
        tab_id: i64,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pending_tab_closes (device_id, tab_id, url, queued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, tab_id, url, to_millis(now)],
        )?;
        Ok(())
    }

    /// Hand out the device's queued closes in order and forget them.
    pub fn drain_closes(&self, device_id: &str) -> Result<Vec<PendingTabClose>> {
        let tx = self.conn.unchecked_transaction()?;

        let pending = {
            let mut stmt = tx.prepare(
                "SELECT tab_id, url
                 FROM pending_tab_closes
                 WHERE device_id = ?1
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![device_id], |row| {
                    Ok(PendingTabClose {
                        tab_id: row.get("tab_id")?,
                        url: row.get("url")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM pending_tab_closes WHERE device_id = ?1",
            params![device_id],
        )?;

        tx.commit()?;
        Ok(pending)
    }
}

impl Database {
    pub async fn replace_device_tabs(
        &self,
        device_id: &str,
        tabs: Vec<BrowserTab>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            DeviceTabRepository::new(conn).replace_snapshot(&device_id, &tabs, now)
        })
        .await
    }

    pub async fn get_device_tabs(&self, device_id: &str) -> Result<DeviceTabs> {
        let device_id = device_id.to_string();
        self.execute(move |conn| DeviceTabRepository::new(conn).snapshot(&device_id))
            .await
    }

    pub async fn get_all_device_tabs(&self) -> Result<Vec<DeviceTabs>> {
        self.execute(|conn| DeviceTabRepository::new(conn).all_snapshots())
            .await
    }

    pub async fn queue_tab_close(
        &self,
        device_id: &str,
        tab_id: i64,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let device_id = device_id.to_string();
        let url = url.to_string();
        self.execute(move |conn| {
            DeviceTabRepository::new(conn).enqueue_close(&device_id, tab_id, &url, now)
        })
        .await
    }

    pub async fn take_pending_tab_closes(&self, device_id: &str) -> Result<Vec<PendingTabClose>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| DeviceTabRepository::new(conn).drain_closes(&device_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: i64, url: &str) -> BrowserTab {
        BrowserTab {
            tab_id: Some(id),
            url: url.to_string(),
            title: None,
        }
    }

    #[tokio::test]
    async fn unknown_device_has_no_snapshot() {
        let db = Database::in_memory().unwrap();

        let tabs = db.get_device_tabs("laptop").await.unwrap();
        assert!(tabs.tabs.is_empty());
        assert!(tabs.last_update.is_none());
        assert!(db.get_all_device_tabs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn report_replaces_previous_snapshot_in_order() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.replace_device_tabs("laptop", vec![tab(1, "https://a.com"), tab(2, "https://b.com")], now)
            .await
            .unwrap();
        let later = now + chrono::Duration::seconds(30);
        db.replace_device_tabs("laptop", vec![tab(9, "https://z.com"), tab(3, "https://c.com")], later)
            .await
            .unwrap();

        let snapshot = db.get_device_tabs("laptop").await.unwrap();
        let ids: Vec<_> = snapshot.tabs.iter().filter_map(|t| t.tab_id).collect();
        assert_eq!(ids, vec![9, 3]);
        assert_eq!(
            snapshot.last_update.map(|t| t.timestamp_millis()),
            Some(later.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn empty_report_still_counts_as_an_update() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.replace_device_tabs("tablet", vec![tab(1, "https://a.com")], now)
            .await
            .unwrap();
        db.replace_device_tabs("tablet", Vec::new(), now).await.unwrap();
        db.replace_device_tabs("laptop", vec![tab(4, "https://d.com")], now)
            .await
            .unwrap();

        let all = db.get_all_device_tabs().await.unwrap();
        let devices: Vec<_> = all.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(devices, vec!["laptop", "tablet"]);
        assert!(all[1].tabs.is_empty());
        assert!(all[1].last_update.is_some());
    }

    #[tokio::test]
    async fn pending_closes_drain_once_per_device() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.queue_tab_close("laptop", 7, "https://games.com", now).await.unwrap();
        db.queue_tab_close("laptop", 8, "https://games.com/2", now).await.unwrap();
        db.queue_tab_close("tablet", 1, "https://other.com", now).await.unwrap();

        let drained = db.take_pending_tab_closes("laptop").await.unwrap();
        assert_eq!(
            drained,
            vec![
                PendingTabClose { tab_id: 7, url: "https://games.com".into() },
                PendingTabClose { tab_id: 8, url: "https://games.com/2".into() },
            ]
        );
        assert!(db.take_pending_tab_closes("laptop").await.unwrap().is_empty());
        assert_eq!(db.take_pending_tab_closes("tablet").await.unwrap().len(), 1);
    }
}
