use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelAction {
    Allow,
    Block,
}

impl ChannelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelAction::Allow => "allow",
            ChannelAction::Block => "block",
        }
    }
}

impl fmt::Display for ChannelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelAction {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "allow" => Ok(ChannelAction::Allow),
            "block" => Ok(ChannelAction::Block),
            other => Err(GateError::invalid(format!(
                "action must be \"allow\" or \"block\", got \"{other}\""
            ))),
        }
    }
}

/// The single active rule for a channel identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRule {
    pub id: i64,
    pub channel_id: Option<String>,
    pub channel_name: String,
    pub action: ChannelAction,
    pub created_at: DateTime<Utc>,
}
