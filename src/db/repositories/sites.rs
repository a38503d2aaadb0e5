use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, from_millis, to_millis},
    models::{normalize_domain, SiteRecord, SiteStatus},
};

/// The two registry collections. Table names never come from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteList {
    Banned,
    Blocked,
}

impl SiteList {
    fn table(&self) -> &'static str {
        match self {
            SiteList::Banned => "banned_sites",
            SiteList::Blocked => "blocked_sites",
        }
    }
}

fn row_to_site(row: &Row) -> Result<SiteRecord, rusqlite::Error> {
    let recorded_at: i64 = row.get("recorded_at")?;

    Ok(SiteRecord {
        domain: row.get("domain")?,
        original_url: row.get("original_url")?,
        title: row.get("title")?,
        recorded_at: from_millis(recorded_at, "recorded_at").map_err(conversion_error)?,
    })
}

pub struct SiteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SiteRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn upsert(
        &self,
        list: SiteList,
        url: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SiteRecord> {
        let record = SiteRecord {
            domain: normalize_domain(url),
            original_url: url.to_string(),
            title: title.map(str::to_string),
            recorded_at: now,
        };

        let sql = format!(
            "INSERT INTO {} (domain, original_url, title, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(domain) DO UPDATE SET
                 original_url = excluded.original_url,
                 title = excluded.title,
                 recorded_at = excluded.recorded_at",
            list.table()
        );
        self.conn.execute(
            &sql,
            params![
                record.domain,
                record.original_url,
                record.title,
                to_millis(record.recorded_at),
            ],
        )?;

        Ok(record)
    }

    fn remove(&self, list: SiteList, url: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE domain = ?1", list.table());
        let removed = self.conn.execute(&sql, params![normalize_domain(url)])?;
        Ok(removed > 0)
    }

    fn contains(&self, list: SiteList, domain: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE domain = ?1", list.table());
        let found: Option<i64> = self
            .conn
            .query_row(&sql, params![domain], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn list(&self, list: SiteList) -> Result<Vec<SiteRecord>> {
        let sql = format!(
            "SELECT domain, original_url, title, recorded_at
             FROM {}
             ORDER BY recorded_at DESC",
            list.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sites = stmt
            .query_map([], row_to_site)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    /// Banning promotes a temporary block: the matching blocked row goes away
    /// in the same transaction.
    pub fn ban(&self, url: &str, title: Option<&str>, now: DateTime<Utc>) -> Result<SiteRecord> {
        let tx = self.conn.unchecked_transaction()?;
        let record = self.upsert(SiteList::Banned, url, title, now)?;
        tx.execute(
            "DELETE FROM blocked_sites WHERE domain = ?1",
            params![record.domain],
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub fn block(&self, url: &str, title: Option<&str>, now: DateTime<Utc>) -> Result<SiteRecord> {
        self.upsert(SiteList::Blocked, url, title, now)
    }

    pub fn unban(&self, url: &str) -> Result<bool> {
        self.remove(SiteList::Banned, url)
    }

    pub fn unblock(&self, url: &str) -> Result<bool> {
        self.remove(SiteList::Blocked, url)
    }

    pub fn clear_blocked(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM blocked_sites", [])?)
    }

    pub fn status(&self, url: &str) -> Result<(String, SiteStatus)> {
        let domain = normalize_domain(url);
        let status = if self.contains(SiteList::Banned, &domain)? {
            SiteStatus::Banned
        } else if self.contains(SiteList::Blocked, &domain)? {
            SiteStatus::Blocked
        } else {
            SiteStatus::Clear
        };
        Ok((domain, status))
    }
}

impl Database {
    pub async fn ban_site(
        &self,
        url: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SiteRecord> {
        let url = url.to_string();
        let title = title.map(str::to_string);
        self.execute(move |conn| SiteRepository::new(conn).ban(&url, title.as_deref(), now))
            .await
    }

    pub async fn unban_site(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        self.execute(move |conn| SiteRepository::new(conn).unban(&url))
            .await
    }

    pub async fn block_site(
        &self,
        url: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SiteRecord> {
        let url = url.to_string();
        let title = title.map(str::to_string);
        self.execute(move |conn| SiteRepository::new(conn).block(&url, title.as_deref(), now))
            .await
    }

    pub async fn unblock_site(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        self.execute(move |conn| SiteRepository::new(conn).unblock(&url))
            .await
    }

    pub async fn clear_blocked_sites(&self) -> Result<usize> {
        self.execute(|conn| SiteRepository::new(conn).clear_blocked())
            .await
    }

    /// Returns the normalized domain together with its registry status.
    pub async fn site_status(&self, url: &str) -> Result<(String, SiteStatus)> {
        let url = url.to_string();
        self.execute(move |conn| SiteRepository::new(conn).status(&url))
            .await
    }

    pub async fn get_banned_sites(&self) -> Result<Vec<SiteRecord>> {
        self.execute(|conn| SiteRepository::new(conn).list(SiteList::Banned))
            .await
    }

    pub async fn get_blocked_sites(&self) -> Result<Vec<SiteRecord>> {
        self.execute(|conn| SiteRepository::new(conn).list(SiteList::Blocked))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ban_promotes_blocked_domain() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.block_site("http://bad.com/a", Some("Bad"), now).await.unwrap();
        db.ban_site("http://bad.com/b", Some("Bad"), now).await.unwrap();

        let (domain, status) = db.site_status("https://bad.com/anything").await.unwrap();
        assert_eq!(domain, "bad.com");
        assert_eq!(status, SiteStatus::Banned);
        assert!(db.get_blocked_sites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn block_does_not_touch_ban() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.ban_site("http://bad.com", None, now).await.unwrap();
        db.block_site("http://bad.com", None, now).await.unwrap();

        assert_eq!(db.get_banned_sites().await.unwrap().len(), 1);
        assert_eq!(
            db.site_status("http://bad.com/x").await.unwrap().1,
            SiteStatus::Banned
        );

        db.unban_site("http://bad.com/y").await.unwrap();
        assert_eq!(
            db.site_status("http://bad.com/x").await.unwrap().1,
            SiteStatus::Blocked
        );
    }

    #[tokio::test]
    async fn mutations_are_idempotent() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.ban_site("http://bad.com", Some("first"), now).await.unwrap();
        db.ban_site("http://bad.com", Some("second"), now).await.unwrap();
        let banned = db.get_banned_sites().await.unwrap();
        assert_eq!(banned.len(), 1);
        assert_eq!(banned[0].title.as_deref(), Some("second"));

        assert!(!db.unblock_site("http://never.com").await.unwrap());
    }

    #[tokio::test]
    async fn clear_blocked_leaves_bans() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.block_site("http://a.com", None, now).await.unwrap();
        db.block_site("http://b.com", None, now).await.unwrap();
        db.ban_site("http://c.com", None, now).await.unwrap();

        assert_eq!(db.clear_blocked_sites().await.unwrap(), 2);
        assert_eq!(
            db.site_status("http://a.com").await.unwrap().1,
            SiteStatus::Clear
        );
        assert_eq!(
            db.site_status("http://c.com").await.unwrap().1,
            SiteStatus::Banned
        );
    }

    #[tokio::test]
    async fn unparseable_url_is_keyed_verbatim() {
        let db = Database::in_memory().unwrap();
        db.block_site("not a url", None, Utc::now()).await.unwrap();
        assert_eq!(
            db.site_status("not a url").await.unwrap(),
            ("not a url".to_string(), SiteStatus::Blocked)
        );
    }
}
