//! Per-device internet grant and classifier strictness.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Strict,
    #[default]
    Moderate,
    Lenient,
}

impl Strictness {
    pub const ALL: [Strictness; 3] = [Strictness::Strict, Strictness::Moderate, Strictness::Lenient];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strictness::Strict => "strict",
            Strictness::Moderate => "moderate",
            Strictness::Lenient => "lenient",
        }
    }

    /// One-line summary shown to the parent after a change.
    pub fn describe(&self) -> &'static str {
        match self {
            Strictness::Strict => {
                "Only educational content allowed (school subjects, documentaries, tutorials)"
            }
            Strictness::Moderate => {
                "Educational + wholesome entertainment allowed, blocks gaming/pranks/drama"
            }
            Strictness::Lenient => {
                "Most content allowed, only blocks clearly inappropriate material"
            }
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Strictness::Strict),
            "moderate" => Ok(Strictness::Moderate),
            "lenient" => Ok(Strictness::Lenient),
            other => Err(GateError::invalid(format!(
                "unknown strictness level '{other}' (expected strict, moderate or lenient)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevicePolicy {
    pub device_id: String,
    pub internet_enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub strictness: Strictness,
    pub updated_at: DateTime<Utc>,
}

/// Effective internet grant of a policy at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAccess {
    Granted { expires_at: Option<DateTime<Utc>> },
    Disabled,
    Expired,
}

impl DeviceAccess {
    pub fn is_granted(&self) -> bool {
        matches!(self, DeviceAccess::Granted { .. })
    }

    /// Reason attached to a denial; `None` while access is granted.
    pub fn denial_reason(&self) -> Option<&'static str> {
        match self {
            DeviceAccess::Granted { .. } => None,
            DeviceAccess::Disabled => Some("Internet access is currently disabled"),
            DeviceAccess::Expired => Some("Internet time has expired"),
        }
    }
}

/// Result of evaluating a device's policy, after any expiry write-back.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCheck {
    pub policy: DevicePolicy,
    pub access: DeviceAccess,
    /// True when this evaluation persisted the expiry correction.
    pub corrected: bool,
}

impl DevicePolicy {
    pub fn with_defaults(device_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            internet_enabled: false,
            expires_at: None,
            strictness: Strictness::default(),
            updated_at: now,
        }
    }

    /// A grant whose expiry is at or before `now` is logically disabled even
    /// though the stored flag still reads enabled.
    pub fn access_at(&self, now: DateTime<Utc>) -> DeviceAccess {
        if !self.internet_enabled {
            return DeviceAccess::Disabled;
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now => DeviceAccess::Expired,
            expires_at => DeviceAccess::Granted { expires_at },
        }
    }
}
