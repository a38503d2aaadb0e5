use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, from_millis, to_millis},
    models::{ChannelAction, ChannelRule},
};
use crate::error::GateError;

fn row_to_rule(row: &Row) -> Result<ChannelRule, rusqlite::Error> {
    let action: String = row.get("action")?;
    let created_at: i64 = row.get("created_at")?;

    Ok(ChannelRule {
        id: row.get("id")?,
        channel_id: row.get("channel_id")?,
        channel_name: row.get("channel_name")?,
        action: action
            .parse()
            .map_err(|err: GateError| conversion_error(err.into()))?,
        created_at: from_millis(created_at, "created_at").map_err(conversion_error)?,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct ChannelRuleRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ChannelRuleRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace whatever rule currently matches either identifier.
    pub fn set_rule(
        &self,
        channel_id: Option<&str>,
        channel_name: &str,
        action: ChannelAction,
        now: DateTime<Utc>,
    ) -> Result<ChannelRule> {
        let channel_id = non_empty(channel_id);
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM channel_rules
             WHERE channel_id = ?1
                OR (TRIM(?2) <> '' AND LOWER(channel_name) = LOWER(?2))",
            params![channel_id, channel_name],
        )?;

        tx.execute(
            "INSERT INTO channel_rules (channel_id, channel_name, action, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![channel_id, channel_name, action.as_str(), to_millis(now)],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ChannelRule {
            id,
            channel_id: channel_id.map(str::to_string),
            channel_name: channel_name.to_string(),
            action,
            created_at: now,
        })
    }

    /// Id match first; the name is only consulted when no id rule exists.
    pub fn resolve(&self, channel_name: &str, channel_id: Option<&str>) -> Result<Option<ChannelRule>> {
        if let Some(channel_id) = non_empty(channel_id) {
            let by_id = self
                .conn
                .query_row(
                    "SELECT id, channel_id, channel_name, action, created_at
                     FROM channel_rules
                     WHERE channel_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1",
                    params![channel_id],
                    row_to_rule,
                )
                .optional()?;
            if by_id.is_some() {
                return Ok(by_id);
            }
        }

        if channel_name.trim().is_empty() {
            return Ok(None);
        }

        let by_name = self
            .conn
            .query_row(
                "SELECT id, channel_id, channel_name, action, created_at
                 FROM channel_rules
                 WHERE LOWER(channel_name) = LOWER(?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![channel_name],
                row_to_rule,
            )
            .optional()?;

        Ok(by_name)
    }

    pub fn remove(&self, channel_name: &str, channel_id: Option<&str>) -> Result<bool> {
        let removed = match non_empty(channel_id) {
            Some(channel_id) => self.conn.execute(
                "DELETE FROM channel_rules WHERE channel_id = ?1",
                params![channel_id],
            )?,
            None if channel_name.trim().is_empty() => 0,
            None => self.conn.execute(
                "DELETE FROM channel_rules WHERE LOWER(channel_name) = LOWER(?1)",
                params![channel_name],
            )?,
        };
        Ok(removed > 0)
    }

    pub fn list_all(&self) -> Result<Vec<ChannelRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, channel_id, channel_name, action, created_at
             FROM channel_rules
             ORDER BY created_at DESC, id DESC",
        )?;

        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rules)
    }
}

impl Database {
    pub async fn set_channel_rule(
        &self,
        channel_id: Option<&str>,
        channel_name: &str,
        action: ChannelAction,
        now: DateTime<Utc>,
    ) -> Result<ChannelRule> {
        if channel_name.trim().is_empty() && non_empty(channel_id).is_none() {
            return Err(anyhow!("channel rule needs a channel id or name"));
        }

        let channel_id = channel_id.map(str::to_string);
        let channel_name = channel_name.to_string();
        self.execute(move |conn| {
            ChannelRuleRepository::new(conn).set_rule(
                channel_id.as_deref(),
                &channel_name,
                action,
                now,
            )
        })
        .await
    }

    pub async fn resolve_channel_rule(
        &self,
        channel_name: &str,
        channel_id: Option<&str>,
    ) -> Result<Option<ChannelRule>> {
        let channel_id = channel_id.map(str::to_string);
        let channel_name = channel_name.to_string();
        self.execute(move |conn| {
            ChannelRuleRepository::new(conn).resolve(&channel_name, channel_id.as_deref())
        })
        .await
    }

    pub async fn remove_channel_rule(
        &self,
        channel_name: &str,
        channel_id: Option<&str>,
    ) -> Result<bool> {
        let channel_id = channel_id.map(str::to_string);
        let channel_name = channel_name.to_string();
        self.execute(move |conn| {
            ChannelRuleRepository::new(conn).remove(&channel_name, channel_id.as_deref())
        })
        .await
    }

    pub async fn get_all_channel_rules(&self) -> Result<Vec<ChannelRule>> {
        self.execute(|conn| ChannelRuleRepository::new(conn).list_all())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn new_rule_supersedes_previous_for_same_channel() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.set_channel_rule(None, "MrBeast", ChannelAction::Block, now)
            .await
            .unwrap();
        db.set_channel_rule(Some("UC123"), "mrbeast", ChannelAction::Allow, now + Duration::seconds(1))
            .await
            .unwrap();

        let rules = db.get_all_channel_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, ChannelAction::Allow);
        assert_eq!(rules[0].channel_id.as_deref(), Some("UC123"));
    }

    #[tokio::test]
    async fn id_match_wins_over_name_match() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.set_channel_rule(Some("UC1"), "Renamed Channel", ChannelAction::Allow, now)
            .await
            .unwrap();
        db.set_channel_rule(None, "Old Name", ChannelAction::Block, now)
            .await
            .unwrap();

        let rule = db
            .resolve_channel_rule("Old Name", Some("UC1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rule.action, ChannelAction::Allow);

        let fallback = db
            .resolve_channel_rule("OLD NAME", Some("UC-unknown"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.action, ChannelAction::Block);
    }

    #[tokio::test]
    async fn remove_reports_whether_a_rule_existed() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.set_channel_rule(None, "Cocomelon", ChannelAction::Block, now)
            .await
            .unwrap();

        assert!(db.remove_channel_rule("cocomelon", None).await.unwrap());
        assert!(!db.remove_channel_rule("cocomelon", None).await.unwrap());
        assert!(db
            .resolve_channel_rule("Cocomelon", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn blank_removal_leaves_id_only_rules_alone() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.set_channel_rule(Some("UC1"), "", ChannelAction::Block, now)
            .await
            .unwrap();
        db.set_channel_rule(Some("UC2"), "", ChannelAction::Allow, now)
            .await
            .unwrap();

        assert!(!db.remove_channel_rule("", None).await.unwrap());
        assert!(!db.remove_channel_rule("   ", Some(" ")).await.unwrap());
        assert_eq!(db.get_all_channel_rules().await.unwrap().len(), 2);

        assert!(db.remove_channel_rule("", Some("UC1")).await.unwrap());
        assert_eq!(db.get_all_channel_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        db.set_channel_rule(None, "first", ChannelAction::Allow, now)
            .await
            .unwrap();
        db.set_channel_rule(None, "second", ChannelAction::Block, now + Duration::seconds(5))
            .await
            .unwrap();

        let names: Vec<_> = db
            .get_all_channel_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|rule| rule.channel_name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }
}
