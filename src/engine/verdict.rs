use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHANNEL_ALLOWED: &str = "Channel is in allowed list";
pub const CHANNEL_BLOCKED: &str = "Channel is blocked";
pub const DECISION_TIMED_OUT: &str = "Decision timed out";

/// The `{allowed, reason}` answer returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(allowed: bool, reason: impl Into<String>) -> Self {
        Self {
            allowed,
            reason: Some(reason.into()),
        }
    }
}

/// A video-watch event reported by the extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentCheck {
    pub device_id: String,
    #[serde(alias = "videoId")]
    pub content_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub description_preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetStatus {
    pub device_id: String,
    pub internet_allowed: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

/// "1 minute", "45 minutes", "2 hours", "1 hour and 5 minutes".
pub fn format_minutes(minutes: i64) -> String {
    render_minutes(minutes, " and ")
}

/// Status-line form: "2 hours 5 minutes remaining".
pub fn format_remaining(minutes: i64) -> String {
    format!("{} remaining", render_minutes(minutes, " "))
}

/// Whole minutes left, rounded up so a grant with seconds remaining still
/// reads as "1 minute". Never negative.
pub fn minutes_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining_ms = (expires_at - now).num_milliseconds().max(0);
    (remaining_ms + 59_999) / 60_000
}

fn render_minutes(minutes: i64, joiner: &str) -> String {
    fn plural(n: i64, unit: &str) -> String {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    }

    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    let mins = minutes % 60;
    if mins == 0 {
        plural(hours, "hour")
    } else {
        format!("{}{joiner}{}", plural(hours, "hour"), plural(mins, "minute"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minutes_render_naturally() {
        assert_eq!(format_minutes(1), "1 minute");
        assert_eq!(format_minutes(45), "45 minutes");
        assert_eq!(format_minutes(60), "1 hour");
        assert_eq!(format_minutes(125), "2 hours and 5 minutes");
        assert_eq!(format_minutes(61), "1 hour and 1 minute");
    }

    #[test]
    fn remaining_time_drops_the_conjunction() {
        assert_eq!(format_remaining(125), "2 hours 5 minutes remaining");
        assert_eq!(format_remaining(120), "2 hours remaining");
    }

    #[test]
    fn partial_minutes_round_up() {
        let now = Utc::now();
        assert_eq!(minutes_until(now + chrono::Duration::seconds(1), now), 1);
        assert_eq!(minutes_until(now + chrono::Duration::minutes(90), now), 90);
        assert_eq!(minutes_until(now - chrono::Duration::minutes(5), now), 0);
    }

    #[test]
    fn allow_verdict_omits_reason_on_the_wire() {
        let json = serde_json::to_string(&Verdict::allow()).unwrap();
        assert_eq!(json, r#"{"allowed":true}"#);
    }

    #[test]
    fn content_check_accepts_extension_payload() {
        let check: ContentCheck = serde_json::from_str(
            r#"{"deviceId":"d1","videoId":"abc","title":"t","channelName":"c"}"#,
        )
        .unwrap();
        assert_eq!(check.content_id, "abc");
        assert!(check.channel_id.is_none());
    }
}
