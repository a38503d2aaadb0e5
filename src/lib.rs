//! Parental-control access gate.
//!
//! A [`DecisionEngine`] answers "may this device open this page / watch this
//! video right now?" from layered policy state, a memoized content classifier
//! and the device's time-bounded internet grant. [`PolicyAdmin`] and the chat
//! [`CommandHandler`] are the parent-facing side.

pub mod admin;
pub mod db;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod notify;
pub mod oracle;
pub mod settings;
mod utils;

use std::sync::Arc;

pub use admin::{AdminCommand, CommandHandler, CommandParser, CommandReply, PolicyAdmin};
pub use db::Database;
pub use engine::{ContentCheck, DecisionEngine, InternetStatus, Verdict};
pub use error::{GateError, GateResult};
pub use settings::{GateSettings, SettingsStore};

use log::{info, warn};

use engine::{Clock, SystemClock};
use maintenance::CacheSweeper;
use notify::{LogNotifier, Notifier, TelegramNotifier};
use oracle::{Classifier, OpenAiClient, UnconfiguredClassifier};

/// Initialise `env_logger` from `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Everything wired together from [`GateSettings`].
pub struct Gate {
    pub db: Database,
    pub engine: DecisionEngine,
    pub admin: PolicyAdmin,
    commands: Option<CommandHandler>,
    telegram: Option<Arc<TelegramNotifier>>,
    sweeper: CacheSweeper,
}

impl Gate {
    /// Open the database, build the engine and clients, and start the cache
    /// sweeper. Must run inside a tokio runtime.
    pub async fn open(settings: &GateSettings) -> GateResult<Self> {
        let db = Database::new(settings.database_path.clone())?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let openai = settings
            .openai
            .api_key
            .as_deref()
            .map(|key| Arc::new(OpenAiClient::new(key, settings.openai.model.as_str())));
        let classifier: Arc<dyn Classifier> = match &openai {
            Some(client) => client.clone(),
            None => {
                warn!("no OpenAI key configured; uncached videos will be denied");
                Arc::new(UnconfiguredClassifier)
            }
        };

        let telegram = match (&settings.telegram.bot_token, &settings.telegram.chat_id) {
            (Some(token), Some(chat_id)) => {
                Some(Arc::new(TelegramNotifier::new(token.as_str(), chat_id.as_str())))
            }
            _ => None,
        };
        let notifier: Arc<dyn Notifier> = match &telegram {
            Some(client) => client.clone(),
            None => {
                warn!("Telegram not configured; notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

        let engine = DecisionEngine::new(db.clone(), classifier, notifier)
            .with_clock(clock.clone())
            .with_classifier_timeout(settings.classifier_timeout());
        let admin = PolicyAdmin::new(db.clone()).with_clock(clock.clone());

        let commands = openai.map(|parser| {
            CommandHandler::new(
                admin.clone(),
                engine.clone(),
                parser,
                settings.default_device_id.as_str(),
            )
        });

        let mut sweeper = CacheSweeper::new();
        if let Some(every) = settings.sweep_interval() {
            sweeper.start(db.clone(), clock, every)?;
        }

        info!("parental gate ready (db: {})", db.path().display());

        Ok(Self {
            db,
            engine,
            admin,
            commands,
            telegram,
            sweeper,
        })
    }

    /// Run a parent chat message through the command handler and, when
    /// Telegram is configured, send the reply back.
    pub async fn handle_parent_message(&self, text: &str) -> GateResult<CommandReply> {
        let Some(commands) = &self.commands else {
            return Err(GateError::upstream("no command parser configured"));
        };

        let reply = commands.handle_text(text).await?;
        if let Some(telegram) = &self.telegram {
            let sent = if reply.markdown {
                telegram.send_markdown(&reply.text).await
            } else {
                telegram.notify(&reply.text).await
            };
            if let Err(err) = sent {
                warn!("failed to deliver command reply: {err}");
            }
        }
        Ok(reply)
    }

    pub async fn shutdown(mut self) -> GateResult<()> {
        self.sweeper.stop().await?;
        Ok(())
    }
}
