//! Parent chat commands: parsed actions mapped onto [`PolicyAdmin`] calls and
//! rendered back as chat replies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use serde_json::Value;

use crate::{
    db::{ChannelAction, Strictness, WatchClassification},
    engine::{format_minutes, minutes_until, DecisionEngine},
    error::{GateError, GateResult},
};

use super::PolicyAdmin;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_GRANT_MINUTES: i64 = 30;
/// Longest grant a chat command may ask for: one year.
pub const MAX_GRANT_MINUTES: i64 = 365 * 24 * 60;
const HISTORY_REPLY_LIMIT: u32 = 20;

const UNKNOWN_REPLY: &str = "❓ I didn't understand that. Try:\n\n\
    • \"allow internet for 30 mins\"\n\
    • \"block internet\"\n\
    • \"allow MrBeast channel\"\n\
    • \"ban tiktok.com\"\n\
    • \"what's being watched?\"\n\
    • \"status\"\n\
    • \"be more strict\" / \"be more lenient\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPeriod {
    Today,
    Week,
    All,
}

impl HistoryPeriod {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("week") => HistoryPeriod::Week,
            Some("all") => HistoryPeriod::All,
            _ => HistoryPeriod::Today,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::Today => "today",
            HistoryPeriod::Week => "week",
            HistoryPeriod::All => "all",
        }
    }

    /// Lower bound for the history query. "Today" starts at UTC midnight.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            HistoryPeriod::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc()),
            HistoryPeriod::Week => Some(now - Duration::days(7)),
            HistoryPeriod::All => None,
        }
    }
}

/// One parent instruction, as produced by a [`CommandParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AllowInternet { minutes: i64 },
    BlockInternet,
    AllowChannel { channel_name: Option<String> },
    BlockChannel { channel_name: Option<String> },
    BanSite { url: Option<String> },
    UnbanSite { url: Option<String> },
    BlockSite { url: Option<String> },
    UnblockSite { url: Option<String> },
    WatchHistory { period: HistoryPeriod },
    Status,
    SetStrictness { level: Option<String> },
    Unknown,
}

fn string_param(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| params.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn minutes_param(params: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .filter_map(|key| params.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_minutes)),
            Value::String(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| s.parse().ok().and_then(whole_minutes))
            }
            _ => None,
        })
        .filter(|minutes| (1..=MAX_GRANT_MINUTES).contains(minutes))
}

fn whole_minutes(value: f64) -> Option<i64> {
    let rounded = value.round();
    (rounded.is_finite() && rounded.abs() <= MAX_GRANT_MINUTES as f64).then_some(rounded as i64)
}

impl AdminCommand {
    /// Builds a command from a parser's `{action, params}` pair. Unrecognised
    /// actions map to [`AdminCommand::Unknown`]; missing params are kept as
    /// `None` so the handler can ask for them.
    pub fn from_parts(action: &str, params: &Value) -> Self {
        let url = || string_param(params, &["url", "site", "domain"]);
        let channel = || string_param(params, &["channel_name", "channel"]);

        match action.trim().to_ascii_uppercase().as_str() {
            "ALLOW_INTERNET" => AdminCommand::AllowInternet {
                minutes: minutes_param(params, &["duration_minutes", "duration"])
                    .unwrap_or(DEFAULT_GRANT_MINUTES),
            },
            "BLOCK_INTERNET" => AdminCommand::BlockInternet,
            "ALLOW_CHANNEL" => AdminCommand::AllowChannel {
                channel_name: channel(),
            },
            "BLOCK_CHANNEL" => AdminCommand::BlockChannel {
                channel_name: channel(),
            },
            "BAN_SITE" => AdminCommand::BanSite { url: url() },
            "UNBAN_SITE" => AdminCommand::UnbanSite { url: url() },
            "BLOCK_SITE" => AdminCommand::BlockSite { url: url() },
            "UNBLOCK_SITE" => AdminCommand::UnblockSite { url: url() },
            "GET_WATCH_HISTORY" => AdminCommand::WatchHistory {
                period: HistoryPeriod::parse(string_param(params, &["time_period"]).as_deref()),
            },
            "GET_STATUS" => AdminCommand::Status,
            "SET_STRICTNESS" => AdminCommand::SetStrictness {
                level: string_param(params, &["level"]),
            },
            _ => AdminCommand::Unknown,
        }
    }
}

/// Turns free text from the parent into an [`AdminCommand`].
#[async_trait]
pub trait CommandParser: Send + Sync {
    async fn parse(&self, text: &str) -> GateResult<AdminCommand>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub markdown: bool,
}

impl CommandReply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: false,
        }
    }

    fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: true,
        }
    }
}

fn clock_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%-I:%M %p").to_string()
}

pub struct CommandHandler {
    admin: PolicyAdmin,
    engine: DecisionEngine,
    parser: Arc<dyn CommandParser>,
    device_id: String,
}

impl CommandHandler {
    pub fn new(
        admin: PolicyAdmin,
        engine: DecisionEngine,
        parser: Arc<dyn CommandParser>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            admin,
            engine,
            parser,
            device_id: device_id.into(),
        }
    }

    /// Parse and execute. A parser failure is answered with the help text
    /// rather than an error.
    pub async fn handle_text(&self, text: &str) -> GateResult<CommandReply> {
        let command = match self.parser.parse(text).await {
            Ok(command) => command,
            Err(err) => {
                log_warn!("could not parse command {text:?}: {err}");
                AdminCommand::Unknown
            }
        };
        log_info!("command {text:?} -> {command:?}");
        self.handle(command).await
    }

    pub async fn handle(&self, command: AdminCommand) -> GateResult<CommandReply> {
        match command {
            AdminCommand::AllowInternet { minutes } => self.allow_internet(minutes).await,
            AdminCommand::BlockInternet => {
                self.admin.disable_internet(&self.device_id).await?;
                Ok(CommandReply::plain("🚫 Internet blocked immediately."))
            }
            AdminCommand::AllowChannel { channel_name } => {
                self.channel_rule(channel_name, ChannelAction::Allow).await
            }
            AdminCommand::BlockChannel { channel_name } => {
                self.channel_rule(channel_name, ChannelAction::Block).await
            }
            AdminCommand::BanSite { url } => self.ban_site(url).await,
            AdminCommand::UnbanSite { url } => self.unban_site(url).await,
            AdminCommand::BlockSite { url } => self.block_site(url).await,
            AdminCommand::UnblockSite { url } => self.unblock_site(url).await,
            AdminCommand::WatchHistory { period } => self.watch_history(period).await,
            AdminCommand::Status => self.status().await,
            AdminCommand::SetStrictness { level } => self.set_strictness(level).await,
            AdminCommand::Unknown => Ok(CommandReply::plain(UNKNOWN_REPLY)),
        }
    }

    async fn allow_internet(&self, minutes: i64) -> GateResult<CommandReply> {
        let duration = Duration::try_minutes(minutes).ok_or_else(|| {
            GateError::invalid(format!("grant of {minutes} minutes is out of range"))
        })?;
        let policy = self
            .admin
            .enable_internet(&self.device_id, Some(duration))
            .await?;
        let cleared = self.admin.clear_blocked_sites().await?;
        if cleared > 0 {
            log_info!("cleared {cleared} temporarily blocked sites");
        }

        let mut text = format!("✅ Internet enabled for {}.", format_minutes(minutes));
        if let Some(expires_at) = policy.expires_at {
            text.push_str(&format!(" Will turn off at {}.", clock_time(expires_at)));
        }
        Ok(CommandReply::plain(text))
    }

    async fn channel_rule(
        &self,
        channel_name: Option<String>,
        action: ChannelAction,
    ) -> GateResult<CommandReply> {
        let Some(channel_name) = channel_name else {
            return Ok(CommandReply::plain("❓ Please specify a channel name."));
        };

        self.admin
            .set_channel_rule(None, &channel_name, action.as_str())
            .await?;

        Ok(CommandReply::plain(match action {
            ChannelAction::Allow => format!(
                "✅ {channel_name} added to allowed list. Videos from this channel will no longer be blocked."
            ),
            ChannelAction::Block => format!("🚫 {channel_name} added to blocked list."),
        }))
    }

    async fn ban_site(&self, url: Option<String>) -> GateResult<CommandReply> {
        let Some(url) = url else {
            return Ok(missing_site());
        };
        let record = self.admin.ban_site(&url, None).await?;
        Ok(CommandReply::plain(format!(
            "⛔ {} is now permanently banned.",
            record.domain
        )))
    }

    async fn unban_site(&self, url: Option<String>) -> GateResult<CommandReply> {
        let Some(url) = url else {
            return Ok(missing_site());
        };
        let text = if self.admin.unban_site(&url).await? {
            format!("✅ {url} is no longer banned.")
        } else {
            format!("ℹ️ {url} was not on the banned list.")
        };
        Ok(CommandReply::plain(text))
    }

    async fn block_site(&self, url: Option<String>) -> GateResult<CommandReply> {
        let Some(url) = url else {
            return Ok(missing_site());
        };
        let record = self.admin.block_site(&url, None).await?;
        Ok(CommandReply::plain(format!(
            "🚫 {} blocked until internet is re-enabled.",
            record.domain
        )))
    }

    async fn unblock_site(&self, url: Option<String>) -> GateResult<CommandReply> {
        let Some(url) = url else {
            return Ok(missing_site());
        };
        let text = if self.admin.unblock_site(&url).await? {
            format!("✅ {url} unblocked.")
        } else {
            format!("ℹ️ {url} was not blocked.")
        };
        Ok(CommandReply::plain(text))
    }

    async fn watch_history(&self, period: HistoryPeriod) -> GateResult<CommandReply> {
        let since = period.since(self.admin.now());
        let history = self
            .engine
            .watch_history(&self.device_id, since, Some(HISTORY_REPLY_LIMIT))
            .await?;

        if history.is_empty() {
            return Ok(CommandReply::plain("📺 No watch history found."));
        }

        let mut text = format!("📺 *Watch History ({})*\n\n", period.as_str());
        for entry in history {
            let blocked = entry.classification == WatchClassification::Blocked;
            let channel = if entry.channel_name.trim().is_empty() {
                "Unknown channel"
            } else {
                entry.channel_name.as_str()
            };

            text.push_str(&format!(
                "{} *{}*\n   {} • {}\n",
                if blocked { "🚫" } else { "✅" },
                entry.title,
                channel,
                clock_time(entry.watched_at)
            ));
            if blocked {
                if let Some(reason) = &entry.reason {
                    text.push_str(&format!("   Reason: {reason}\n"));
                }
            }
            text.push('\n');
        }

        Ok(CommandReply::markdown(text))
    }

    async fn status(&self) -> GateResult<CommandReply> {
        let now = self.admin.now();
        let status = self.engine.internet_status(&self.device_id).await?;
        let policy = self.admin.get_or_create_policy(&self.device_id).await?;

        let mut text = String::from("📊 *Current Status*\n\n");
        if status.internet_allowed {
            text.push_str("🌐 Internet: *Enabled*\n");
            match status.expires_at {
                Some(expires_at) => {
                    text.push_str(&format!(
                        "   ⏱ Time remaining: {}\n   Turns off at: {}\n",
                        format_minutes(minutes_until(expires_at, now)),
                        clock_time(expires_at)
                    ));
                }
                None => text.push_str("   No time limit set\n"),
            }
        } else {
            text.push_str("🌐 Internet: *Blocked*\n");
        }

        text.push_str(&format!("\n🔒 Strictness: *{}*\n", policy.strictness));

        let rules = self.admin.channel_rules().await?;
        if !rules.is_empty() {
            let allowed = rules
                .iter()
                .filter(|rule| rule.action == ChannelAction::Allow)
                .count();
            text.push_str(&format!(
                "\n📺 Channels: {allowed} allowed, {} blocked\n",
                rules.len() - allowed
            ));
        }

        let banned = self.admin.banned_sites().await?;
        if !banned.is_empty() {
            text.push_str(&format!("⛔ Banned sites: {}\n", banned.len()));
        }

        let stats = self
            .engine
            .watch_stats(&self.device_id, HistoryPeriod::Today.since(now))
            .await?;
        if stats.total > 0 {
            text.push_str(&format!(
                "\n📈 Today: {} allowed, {} blocked\n",
                stats.allowed, stats.blocked
            ));
        }

        Ok(CommandReply::markdown(text))
    }

    async fn set_strictness(&self, level: Option<String>) -> GateResult<CommandReply> {
        let Some(strictness) = level.and_then(|level| level.parse::<Strictness>().ok()) else {
            return Ok(CommandReply::plain(
                "❓ Please specify a valid strictness level: strict, moderate, lenient",
            ));
        };

        self.admin
            .set_strictness(&self.device_id, strictness.as_str())
            .await?;

        Ok(CommandReply::markdown(format!(
            "🔒 Strictness set to *{strictness}*\n\n{}",
            strictness.describe()
        )))
    }
}

fn missing_site() -> CommandReply {
    CommandReply::plain("❓ Please specify a website.")
}
