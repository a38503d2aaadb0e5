//! Administrative surface: the only writer of site registry and channel rules,
//! and the explicit setter of device grants and strictness.
//!
//! Device tab snapshots and queued tab closes live in `tabs`.

pub mod commands;
mod tabs;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    db::{
        ChannelAction, ChannelRule, Database, DevicePolicy, SiteRecord, SiteStatus, Strictness,
    },
    engine::{Clock, SystemClock},
    error::{require, GateError, GateResult},
};

pub use commands::{AdminCommand, CommandHandler, CommandParser, CommandReply, HistoryPeriod};
pub use tabs::TabPoll;

#[derive(Clone)]
pub struct PolicyAdmin {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl PolicyAdmin {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn get_or_create_policy(&self, device_id: &str) -> GateResult<DevicePolicy> {
        require(device_id, "deviceId")?;
        Ok(self.db.get_or_create_policy(device_id, self.now()).await?)
    }

    /// Replaces the enabled/expiry pair as given.
    pub async fn set_internet_access(
        &self,
        device_id: &str,
        enabled: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> GateResult<DevicePolicy> {
        require(device_id, "deviceId")?;
        Ok(self
            .db
            .set_internet_access(device_id, enabled, expires_at, self.now())
            .await?)
    }

    /// Grant access for `duration` from now, or without limit when `None`.
    pub async fn enable_internet(
        &self,
        device_id: &str,
        duration: Option<Duration>,
    ) -> GateResult<DevicePolicy> {
        let expires_at = match duration {
            Some(duration) if duration <= Duration::zero() => {
                return Err(GateError::invalid("grant duration must be positive"));
            }
            Some(duration) => Some(
                self.now()
                    .checked_add_signed(duration)
                    .ok_or_else(|| GateError::invalid("grant duration is out of range"))?,
            ),
            None => None,
        };
        self.set_internet_access(device_id, true, expires_at).await
    }

    pub async fn disable_internet(&self, device_id: &str) -> GateResult<DevicePolicy> {
        self.set_internet_access(device_id, false, None).await
    }

    /// Accepts `strict`, `moderate` or `lenient` in any case.
    pub async fn set_strictness(&self, device_id: &str, level: &str) -> GateResult<DevicePolicy> {
        require(device_id, "deviceId")?;
        let strictness: Strictness = level.parse()?;
        Ok(self
            .db
            .set_strictness(device_id, strictness, self.now())
            .await?)
    }

    pub async fn ban_site(&self, url: &str, title: Option<&str>) -> GateResult<SiteRecord> {
        require(url, "url")?;
        Ok(self.db.ban_site(url, title, self.now()).await?)
    }

    pub async fn unban_site(&self, url: &str) -> GateResult<bool> {
        require(url, "url")?;
        Ok(self.db.unban_site(url).await?)
    }

    pub async fn block_site(&self, url: &str, title: Option<&str>) -> GateResult<SiteRecord> {
        require(url, "url")?;
        Ok(self.db.block_site(url, title, self.now()).await?)
    }

    pub async fn unblock_site(&self, url: &str) -> GateResult<bool> {
        require(url, "url")?;
        Ok(self.db.unblock_site(url).await?)
    }

    /// Drops every temporary block. Returns how many were removed.
    pub async fn clear_blocked_sites(&self) -> GateResult<usize> {
        Ok(self.db.clear_blocked_sites().await?)
    }

    pub async fn site_status(&self, url: &str) -> GateResult<SiteStatus> {
        require(url, "url")?;
        let (_, status) = self.db.site_status(url).await?;
        Ok(status)
    }

    pub async fn banned_sites(&self) -> GateResult<Vec<SiteRecord>> {
        Ok(self.db.get_banned_sites().await?)
    }

    pub async fn blocked_sites(&self) -> GateResult<Vec<SiteRecord>> {
        Ok(self.db.get_blocked_sites().await?)
    }

    /// Replaces any rule matching either identifier. `action` must be
    /// exactly `allow` or `block`.
    pub async fn set_channel_rule(
        &self,
        channel_id: Option<&str>,
        channel_name: &str,
        action: &str,
    ) -> GateResult<ChannelRule> {
        let action: ChannelAction = action.parse()?;
        let has_id = channel_id.is_some_and(|id| !id.trim().is_empty());
        if !has_id {
            require(channel_name, "channelName")?;
        }
        Ok(self
            .db
            .set_channel_rule(channel_id, channel_name, action, self.now())
            .await?)
    }

    pub async fn resolve_channel_rule(
        &self,
        channel_name: &str,
        channel_id: Option<&str>,
    ) -> GateResult<Option<ChannelRule>> {
        Ok(self
            .db
            .resolve_channel_rule(channel_name, channel_id)
            .await?)
    }

    /// Removes by id when one is given, otherwise by case-insensitive name.
    pub async fn remove_channel_rule(
        &self,
        channel_name: &str,
        channel_id: Option<&str>,
    ) -> GateResult<bool> {
        Ok(self
            .db
            .remove_channel_rule(channel_name, channel_id)
            .await?)
    }

    pub async fn channel_rules(&self) -> GateResult<Vec<ChannelRule>> {
        Ok(self.db.get_all_channel_rules().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;

    fn admin() -> (PolicyAdmin, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let admin = PolicyAdmin::new(Database::in_memory().unwrap()).with_clock(clock.clone());
        (admin, clock)
    }

    #[tokio::test]
    async fn enable_for_duration_sets_expiry_from_clock() {
        let (admin, clock) = admin();

        let policy = admin
            .enable_internet("d1", Some(Duration::minutes(30)))
            .await
            .unwrap();

        assert!(policy.internet_enabled);
        assert_eq!(
            policy.expires_at.map(|t| t.timestamp_millis()),
            Some((clock.now() + Duration::minutes(30)).timestamp_millis())
        );
    }

    #[tokio::test]
    async fn non_positive_duration_is_rejected() {
        let (admin, _) = admin();
        let result = admin.enable_internet("d1", Some(Duration::zero())).await;
        assert!(matches!(result, Err(GateError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unrepresentable_expiry_is_rejected() {
        let (admin, _) = admin();

        let result = admin
            .enable_internet("d1", Some(Duration::days(100_000_000)))
            .await;
        assert!(matches!(result, Err(GateError::InvalidArgument(_))));

        let policy = admin.get_or_create_policy("d1").await.unwrap();
        assert!(!policy.internet_enabled);
    }

    #[tokio::test]
    async fn unknown_strictness_is_rejected_and_policy_untouched() {
        let (admin, _) = admin();

        let result = admin.set_strictness("d1", "extreme").await;
        assert!(matches!(result, Err(GateError::InvalidArgument(_))));

        let policy = admin.get_or_create_policy("d1").await.unwrap();
        assert_eq!(policy.strictness, Strictness::Moderate);

        let policy = admin.set_strictness("d1", "LENIENT").await.unwrap();
        assert_eq!(policy.strictness, Strictness::Lenient);
    }

    #[tokio::test]
    async fn channel_action_must_be_exact() {
        let (admin, _) = admin();

        let result = admin.set_channel_rule(None, "Dream", "deny").await;
        assert!(matches!(result, Err(GateError::InvalidArgument(_))));

        let result = admin.set_channel_rule(None, "  ", "allow").await;
        assert!(matches!(result, Err(GateError::InvalidArgument(_))));

        let rule = admin
            .set_channel_rule(Some("UC1"), "", "block")
            .await
            .unwrap();
        assert_eq!(rule.action, ChannelAction::Block);
    }

    #[tokio::test]
    async fn ban_promotes_a_blocked_site() {
        let (admin, _) = admin();
        admin.block_site("https://a.com/x", None).await.unwrap();
        admin.ban_site("https://a.com/y", Some("A")).await.unwrap();

        assert_eq!(
            admin.site_status("http://a.com").await.unwrap(),
            SiteStatus::Banned
        );
        assert!(admin.blocked_sites().await.unwrap().is_empty());
        assert!(admin.unban_site("a.com").await.unwrap());
        assert!(!admin.unban_site("a.com").await.unwrap());
    }

    #[tokio::test]
    async fn empty_url_is_invalid() {
        let (admin, _) = admin();
        assert!(matches!(
            admin.block_site("", None).await,
            Err(GateError::InvalidArgument(_))
        ));
    }
}
