use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    admin::{AdminCommand, CommandParser},
    error::{GateError, GateResult},
};

use super::{Classification, ClassificationRequest, Classifier};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 20;

const COMMAND_PROMPT: &str = r#"You turn a parent's chat message into one parental-control action.

Actions and their params:
- ALLOW_INTERNET: duration_minutes (number, default 30)
- BLOCK_INTERNET: none
- ALLOW_CHANNEL: channel_name
- BLOCK_CHANNEL: channel_name
- BAN_SITE: url
- UNBAN_SITE: url
- BLOCK_SITE: url
- UNBLOCK_SITE: url
- GET_WATCH_HISTORY: time_period (today, week, all)
- GET_STATUS: none
- SET_STRICTNESS: level (strict, moderate, lenient)
- UNKNOWN: anything else

Answer with JSON only: {"action": "ACTION_NAME", "params": {...}}"#;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    allowed: bool,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RawCommand {
    action: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Chat-completions client used both as the video classifier and as the
/// parent command parser.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        messages: Vec<ChatMessage<'_>>,
    ) -> GateResult<T> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GateError::upstream("completion returned no content"))?;

        debug!("completion content: {content}");
        Ok(serde_json::from_str(&content)?)
    }
}

fn classification_prompt(request: &ClassificationRequest) -> String {
    format!(
        "Decide whether this YouTube video is appropriate for a child. Answer with JSON only.\n\n\
         Strictness: {strictness}\n\n\
         STRICT: only clearly educational videos (school subjects, documentaries, tutorials). \
         Block entertainment, gaming and vlogs.\n\
         MODERATE: educational plus wholesome entertainment. Block gaming, pranks, drama and \"brain rot\".\n\
         LENIENT: most content. Only block clearly inappropriate material.\n\n\
         Title: {title}\n\
         Channel: {channel}\n\
         Description preview: {description}\n\n\
         {{\"allowed\": true/false, \"reason\": \"brief reason\"}}",
        strictness = request.strictness,
        title = request.title,
        channel = request.channel_name,
        description = request.description_preview,
    )
}

#[async_trait]
impl Classifier for OpenAiClient {
    async fn classify(&self, request: &ClassificationRequest) -> GateResult<Classification> {
        let prompt = classification_prompt(request);
        let verdict: RawVerdict = self
            .complete_json(vec![ChatMessage {
                role: "system",
                content: &prompt,
            }])
            .await?;

        Ok(Classification {
            allowed: verdict.allowed,
            reason: verdict
                .reason
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "No reason provided".to_string()),
        })
    }
}

#[async_trait]
impl CommandParser for OpenAiClient {
    async fn parse(&self, text: &str) -> GateResult<AdminCommand> {
        let raw: RawCommand = self
            .complete_json(vec![
                ChatMessage {
                    role: "system",
                    content: COMMAND_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ])
            .await?;

        Ok(AdminCommand::from_parts(
            raw.action.as_deref().unwrap_or("UNKNOWN"),
            &raw.params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Strictness;

    #[test]
    fn prompt_carries_strictness_and_subject() {
        let prompt = classification_prompt(&ClassificationRequest {
            title: "Minecraft speedrun".into(),
            channel_name: "Dream".into(),
            description_preview: "world record".into(),
            strictness: Strictness::Strict,
        });

        assert!(prompt.contains("Strictness: strict"));
        assert!(prompt.contains("Title: Minecraft speedrun"));
        assert!(prompt.contains("Channel: Dream"));
        assert!(prompt.ends_with(r#"{"allowed": true/false, "reason": "brief reason"}"#));
    }

    #[test]
    fn verdict_without_reason_parses() {
        let verdict: RawVerdict = serde_json::from_str(r#"{"allowed": true}"#).unwrap();
        assert!(verdict.allowed);
        assert!(verdict.reason.is_none());
    }
}
