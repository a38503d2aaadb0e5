//! Fire-and-forget notifications to the parent.

mod telegram;

use async_trait::async_trait;
use log::info;

use crate::error::GateResult;

pub use telegram::TelegramNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> GateResult<()>;
}

/// Writes notifications to the log. Used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> GateResult<()> {
        info!("[notify] {message}");
        Ok(())
    }
}
