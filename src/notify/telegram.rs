use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{GateError, GateResult};

use super::Notifier;

const API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

/// Sends messages to a single authorized chat through the Bot API.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// Send with Markdown formatting; used for command replies.
    pub async fn send_markdown(&self, text: &str) -> GateResult<()> {
        self.send(text, Some("Markdown")).await
    }

    async fn send(&self, text: &str, parse_mode: Option<&str>) -> GateResult<()> {
        if self.chat_id.is_empty() {
            return Err(GateError::upstream("telegram chat id not configured"));
        }

        self.http
            .post(self.send_url())
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode,
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> GateResult<()> {
        self.send(message, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_url_embeds_token() {
        let notifier = TelegramNotifier::new("123:abc", "42").with_api_base("http://localhost:9");
        assert_eq!(notifier.send_url(), "http://localhost:9/bot123:abc/sendMessage");
    }

    #[tokio::test]
    async fn missing_chat_id_is_upstream_error() {
        let notifier = TelegramNotifier::new("123:abc", "");
        assert!(matches!(
            notifier.notify("hello").await,
            Err(GateError::UpstreamUnavailable(_))
        ));
    }
}
