//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] returns pre-configured replies in order, allowing
//! deterministic pipeline runs. It is also registered as the `mock` client
//! kind so whole pipelines can be exercised from a configuration file.
//!
//! # Example
//!
//! ```
//! use prompt_pipeline::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec![r#"{"text": "Hello, world!"}"#.to_string()]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Backend, LlmRequest, LlmResponse};
use crate::client::{BackendClient, Params};
use crate::config::{params_object, take_optional_str};
use crate::error::Result;
use crate::types::TokenUsage;
use crate::PipelineError;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this text verbatim.
    Text(String),
    /// Reply `{"text": <prompt>}`.
    Echo,
    /// Fail the call with this message.
    Fail(String),
}

/// A test backend that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed. An
/// empty script fails every call.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    latency: Option<Duration>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given canned text responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::from_replies(responses.into_iter().map(MockReply::Text).collect())
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock that answers every prompt with `{"text": prompt}`.
    pub fn echo() -> Self {
        Self::from_replies(vec![MockReply::Echo])
    }

    pub fn from_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    fn next_reply(&self) -> Option<&MockReply> {
        if self.replies.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies.get(idx)
    }

    fn parse_reply(value: &Value) -> Result<MockReply> {
        match value {
            Value::String(text) => Ok(MockReply::Text(text.clone())),
            Value::Object(map) => {
                if let Some(message) = map.get("error").and_then(Value::as_str) {
                    Ok(MockReply::Fail(message.to_string()))
                } else if map.get("echo").and_then(Value::as_bool) == Some(true) {
                    Ok(MockReply::Echo)
                } else {
                    Err(PipelineError::config(format!(
                        "mock client: unsupported reply object {}",
                        value
                    )))
                }
            }
            other => Err(PipelineError::config(format!(
                "mock client: replies must be strings or objects, got {}",
                other
            ))),
        }
    }

    /// Build a mock from `mock` client parameters.
    ///
    /// Accepts `responses` (array of strings, `{"error": msg}` or
    /// `{"echo": true}`), a single `response` string, or `"echo": true`.
    /// `latency_ms` delays every reply.
    pub fn from_params(params: &mut Params) -> Result<Self> {
        let mut replies = Vec::new();
        if let Some(responses) = params.remove("responses") {
            let items = responses.as_array().ok_or_else(|| {
                PipelineError::config("mock client: 'responses' must be an array")
            })?;
            for item in items {
                replies.push(Self::parse_reply(item)?);
            }
        }
        if let Some(response) = take_optional_str(params, "response", "mock client")? {
            replies.push(MockReply::Text(response));
        }
        if params.remove("echo").and_then(|v| v.as_bool()) == Some(true) {
            replies.push(MockReply::Echo);
        }

        let mut mock = Self::from_replies(replies);
        if let Some(latency) = params.remove("latency_ms") {
            let millis = latency.as_u64().ok_or_else(|| {
                PipelineError::config("mock client: 'latency_ms' must be a non-negative integer")
            })?;
            mock = mock.with_latency(Duration::from_millis(millis));
        }
        Ok(mock)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let text = match self.next_reply() {
            Some(MockReply::Text(text)) => text.clone(),
            Some(MockReply::Echo) => json!({"text": request.prompt}).to_string(),
            Some(MockReply::Fail(message)) => return Err(PipelineError::Other(message.clone())),
            None => return Err(PipelineError::Other("mock backend has no scripted replies".into())),
        };

        let words = request.prompt.split_whitespace().count() + text.split_whitespace().count();
        Ok(LlmResponse {
            text,
            usage: TokenUsage::Total(words as u64),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Build a client from `mock` stage parameters. `model` defaults to `"mock"`;
/// remaining keys become default request parameters.
pub fn client_from_params(params: &Value) -> Result<BackendClient> {
    let mut params = params_object(params, "mock client")?;
    let model = take_optional_str(&mut params, "model", "mock client")?
        .unwrap_or_else(|| "mock".to_string());
    let backend = MockBackend::from_params(&mut params)?;
    Ok(BackendClient::new(Arc::new(backend), model).with_defaults(params))
}
