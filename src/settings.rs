use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_USER_ID: &str = "TELEGRAM_USER_ID";
pub const ENV_DATABASE_PATH: &str = "PARENTAL_GATE_DB";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Chat that receives notifications and is allowed to send commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateSettings {
    pub database_path: PathBuf,
    /// Device addressed by parent chat commands.
    pub default_device_id: String,
    pub classifier_timeout_secs: u64,
    /// Cache sweep period; `None` leaves purging to lookups.
    pub sweep_interval_secs: Option<u64>,
    pub openai: OpenAiSettings,
    pub telegram: TelegramSettings,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("parental-gate.db"),
            default_device_id: "default".into(),
            classifier_timeout_secs: 15,
            sweep_interval_secs: Some(3600),
            openai: OpenAiSettings::default(),
            telegram: TelegramSettings::default(),
        }
    }
}

impl GateSettings {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Apply secrets and the database path from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(ENV_OPENAI_API_KEY) {
            self.openai.api_key = Some(key);
        }
        if let Some(token) = lookup(ENV_TELEGRAM_BOT_TOKEN) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = lookup(ENV_TELEGRAM_USER_ID) {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        self
    }
}

/// JSON settings file. Environment overrides are applied on read and never
/// written back.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<GateSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            Self::read_file(&path)?
        } else {
            GateSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read_file(path: &Path) -> Result<GateSettings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(
                "ignoring malformed settings in {}: {err}",
                path.display()
            );
            GateSettings::default()
        }))
    }

    /// Effective settings: file contents plus environment overrides.
    pub fn current(&self) -> Result<GateSettings> {
        Ok(self.read()?.clone().with_env_overrides())
    }

    pub fn update(&self, settings: GateSettings) -> Result<()> {
        let mut guard = self.write()?;
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let data = Self::read_file(&self.path)?;
        *self.write()? = data;
        Ok(())
    }

    fn persist(&self, data: &GateSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GateSettings>> {
        self.data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GateSettings>> {
        self.data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let settings = store.read().unwrap().clone();
        assert_eq!(settings, GateSettings::default());
        assert_eq!(settings.classifier_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"default_device_id": "kid-laptop", "sweep_interval_secs": null}"#,
        )
        .unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.read().unwrap().clone();
        assert_eq!(settings.default_device_id, "kid-laptop");
        assert_eq!(settings.sweep_interval(), None);
        assert_eq!(settings.openai.model, "gpt-4o-mini");
    }

    #[test]
    fn update_persists_and_reload_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = GateSettings::default();
        settings.classifier_timeout_secs = 5;
        store.update(settings).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        reopened.reload().unwrap();
        assert_eq!(reopened.read().unwrap().classifier_timeout_secs, 5);
    }

    #[test]
    fn overrides_replace_secrets_and_skip_blanks() {
        let settings = GateSettings::default().with_overrides(|key| match key {
            ENV_OPENAI_API_KEY => Some("sk-test".into()),
            ENV_TELEGRAM_USER_ID => Some("  ".into()),
            ENV_DATABASE_PATH => Some("/tmp/gate.db".into()),
            _ => None,
        });

        assert_eq!(settings.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.telegram.chat_id, None);
        assert_eq!(settings.database_path, PathBuf::from("/tmp/gate.db"));
    }
}
