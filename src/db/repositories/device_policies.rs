use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{from_millis, from_optional_millis, to_millis},
    models::{AccessCheck, DeviceAccess, DevicePolicy, Strictness},
};

fn row_to_policy(row: &Row) -> Result<DevicePolicy> {
    let strictness: String = row.get("strictness")?;

    Ok(DevicePolicy {
        device_id: row.get("device_id")?,
        internet_enabled: row.get("internet_enabled")?,
        expires_at: from_optional_millis(row.get("expires_at")?, "expires_at")?,
        strictness: strictness.parse()?,
        updated_at: from_millis(row.get("updated_at")?, "updated_at")?,
    })
}

pub struct DevicePolicyRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DevicePolicyRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert the default policy if the device is unseen, then read it back.
    pub fn get_or_create(&self, device_id: &str, now: DateTime<Utc>) -> Result<DevicePolicy> {
        let defaults = DevicePolicy::with_defaults(device_id, now);

        self.conn.execute(
            "INSERT INTO device_policies (device_id, internet_enabled, expires_at, strictness, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4)
             ON CONFLICT(device_id) DO NOTHING",
            params![
                defaults.device_id,
                defaults.internet_enabled,
                defaults.strictness.as_str(),
                to_millis(defaults.updated_at),
            ],
        )?;

        self.get(device_id)?
            .ok_or_else(|| anyhow!("policy for device {device_id} missing after insert"))
    }

    fn get(&self, device_id: &str) -> Result<Option<DevicePolicy>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, internet_enabled, expires_at, strictness, updated_at
             FROM device_policies
             WHERE device_id = ?1",
        )?;

        let mut rows = stmt.query(params![device_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_policy(row)?)),
            None => Ok(None),
        }
    }

    pub fn set_internet_access(
        &self,
        device_id: &str,
        enabled: bool,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DevicePolicy> {
        self.get_or_create(device_id, now)?;

        self.conn.execute(
            "UPDATE device_policies
             SET internet_enabled = ?1,
                 expires_at = ?2,
                 updated_at = ?3
             WHERE device_id = ?4",
            params![enabled, expires_at.map(to_millis), to_millis(now), device_id],
        )?;

        self.get_or_create(device_id, now)
    }

    pub fn set_strictness(
        &self,
        device_id: &str,
        strictness: Strictness,
        now: DateTime<Utc>,
    ) -> Result<DevicePolicy> {
        self.get_or_create(device_id, now)?;

        self.conn.execute(
            "UPDATE device_policies
             SET strictness = ?1,
                 updated_at = ?2
             WHERE device_id = ?3",
            params![strictness.as_str(), to_millis(now), device_id],
        )?;

        self.get_or_create(device_id, now)
    }

    /// Evaluate the grant at `now`. An elapsed grant is written back as
    /// disabled with no expiry; once corrected, later reads see a plain
    /// disabled policy and write nothing.
    pub fn resolve_access(&self, device_id: &str, now: DateTime<Utc>) -> Result<AccessCheck> {
        let policy = self.get_or_create(device_id, now)?;
        let access = policy.access_at(now);

        if access != DeviceAccess::Expired {
            return Ok(AccessCheck {
                policy,
                access,
                corrected: false,
            });
        }

        let policy = self.set_internet_access(device_id, false, None, now)?;
        Ok(AccessCheck {
            policy,
            access,
            corrected: true,
        })
    }
}

impl Database {
    pub async fn get_or_create_policy(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DevicePolicy> {
        let device_id = device_id.to_string();
        self.execute(move |conn| DevicePolicyRepository::new(conn).get_or_create(&device_id, now))
            .await
    }

    pub async fn set_internet_access(
        &self,
        device_id: &str,
        enabled: bool,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DevicePolicy> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            DevicePolicyRepository::new(conn).set_internet_access(&device_id, enabled, expires_at, now)
        })
        .await
    }

    pub async fn set_strictness(
        &self,
        device_id: &str,
        strictness: Strictness,
        now: DateTime<Utc>,
    ) -> Result<DevicePolicy> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            DevicePolicyRepository::new(conn).set_strictness(&device_id, strictness, now)
        })
        .await
    }

    /// Read-and-correct in a single DB task so concurrent checks for the same
    /// device never observe a half-applied correction.
    pub async fn resolve_device_access(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessCheck> {
        let device_id = device_id.to_string();
        self.execute(move |conn| DevicePolicyRepository::new(conn).resolve_access(&device_id, now))
            .await
    }
}
