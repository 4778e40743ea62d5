use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline and its components.
///
/// Only [`PipelineError::InvalidConfig`] (and the loader variants feeding it)
/// ever escapes [`Pipeline::execute`](crate::Pipeline::execute). Every other
/// variant is raised inside a client and folded into a failure
/// [`ReplyEnvelope`](crate::types::ReplyEnvelope) before it reaches the
/// orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration could not be parsed.
    #[cfg(feature = "yaml")]
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration detected before any stage ran.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential fetch failed or the backend rejected the access token.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend answered with an application-level error code.
    #[error("Backend error {code}: {message}")]
    Backend { code: i64, message: String },

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// The `retry_after` field is populated from the `Retry-After` response
    /// header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A stage tried to write a state slot that was already written this run.
    #[error("State slot '{0}' was already written in this run")]
    StateConflict(String),

    /// A stage exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::InvalidConfig`].
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfig(message.into())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
