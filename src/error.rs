//! Error taxonomy shared by the decision engine and the administration layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed input; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Classifier, command parser or notification sink failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The durable store could not complete the operation.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl GateError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(message.into())
    }
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::UpstreamUnavailable(format!("malformed upstream payload: {err}"))
    }
}

pub type GateResult<T> = Result<T, GateError>;

/// Rejects empty or whitespace-only identifiers.
pub(crate) fn require(value: &str, name: &str) -> GateResult<()> {
    if value.trim().is_empty() {
        return Err(GateError::invalid(format!(
            "missing required parameter: {name}"
        )));
    }
    Ok(())
}
