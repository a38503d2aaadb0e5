//! Content classification oracle.
//!
//! The engine only sees the [`Classifier`] trait; failures are turned into a
//! conservative denial by the caller, never by the implementation.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{db::Strictness, error::GateResult};

pub use openai::OpenAiClient;

/// Reason recorded when the classifier cannot produce a verdict.
pub const CLASSIFICATION_UNAVAILABLE: &str = "Classification unavailable";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    pub title: String,
    pub channel_name: String,
    pub description_preview: String,
    pub strictness: Strictness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub allowed: bool,
    pub reason: String,
}

impl Classification {
    pub fn unavailable() -> Self {
        Self {
            allowed: false,
            reason: CLASSIFICATION_UNAVAILABLE.to_string(),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> GateResult<Classification>;
}

/// Stand-in used when no classifier is configured; every call fails, so every
/// uncached video is denied.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredClassifier;

#[async_trait]
impl Classifier for UnconfiguredClassifier {
    async fn classify(&self, _request: &ClassificationRequest) -> GateResult<Classification> {
        Err(crate::error::GateError::upstream("no classifier configured"))
    }
}
