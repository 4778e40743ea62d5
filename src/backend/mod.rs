//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM vendors, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and vendor HTTP APIs.
//! Built-in implementations: [`BaiduBackend`], [`OpenAiBackend`],
//! [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! BackendClient ──► LlmRequest ──► with_backoff ──► Backend::complete() ──► LlmResponse
//!                                                         │
//!                                  ┌──────────────────────┼──────────────────┐
//!                             BaiduBackend          OpenAiBackend        MockBackend
//!                        token_url + {model}     /chat/completions     canned replies
//!                        one token refresh
//! ```

pub mod backoff;
pub mod baidu;
pub mod mock;
pub mod openai;
pub mod transport;

pub use backoff::BackoffConfig;
pub use baidu::BaiduBackend;
pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;
pub use transport::{HttpPost, ReqwestTransport, Transport};

use crate::client::Params;
use crate::error::Result;
use crate::types::TokenUsage;
use crate::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A normalized, vendor-agnostic LLM request.
///
/// [`BackendClient`](crate::client::BackendClient) builds this from its
/// layered parameters. The [`Backend`] translates it into the vendor request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"ernie-lite-8k"`, `"gpt-4o"`).
    pub model: String,

    /// The user prompt text.
    pub prompt: String,

    /// Prior conversation turns sent ahead of the prompt.
    pub history: Vec<ChatMessage>,

    /// Sampling and vendor parameters, passed through verbatim.
    pub params: Params,

    /// Credential refreshes left for this logical call, shared by every
    /// backoff attempt made for it.
    pub refresh: RefreshBudget,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            history: Vec::new(),
            params: Params::new(),
            refresh: RefreshBudget::default(),
        }
    }

    /// `history` followed by the prompt as a user turn, in wire form.
    pub fn messages(&self) -> Vec<Value> {
        let mut messages: Vec<Value> = self
            .history
            .iter()
            .map(|msg| json!({"role": msg.role, "content": msg.content}))
            .collect();
        messages.push(json!({"role": Role::User, "content": self.prompt}));
        messages
    }
}

/// One credential refresh per logical call.
///
/// Clones share the same budget, so a request retried by [`with_backoff`]
/// cannot refresh again after an earlier attempt already did.
#[derive(Debug, Clone, Default)]
pub struct RefreshBudget {
    spent: Arc<AtomicBool>,
}

impl RefreshBudget {
    /// Spend the refresh. Returns `false` if it was already spent.
    pub fn take(&self) -> bool {
        !self.spent.swap(true, Ordering::SeqCst)
    }

    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::SeqCst)
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
}

/// A normalized LLM response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// Token accounting as reported by the vendor.
    pub usage: TokenUsage,
}

/// Abstraction over LLM vendors.
///
/// Implementors own whatever per-vendor state the protocol needs (access
/// tokens, HTTP transport) and report failures as [`PipelineError`]s; the
/// caller turns those into failure envelopes.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one LLM call.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Token layout this vendor reports; used to shape zeroed failure usage.
    fn usage_shape(&self) -> TokenUsage {
        TokenUsage::Total(0)
    }
}

/// Check whether a [`PipelineError`] is retryable based on the backoff config.
///
/// Retryable conditions:
/// - [`PipelineError::HttpError`] with a status in `config.retryable_statuses`
/// - [`PipelineError::Request`] (connection/transport errors)
///
/// Authentication failures are never retried here; vendors that support it
/// refresh credentials themselves.
pub fn is_retryable(error: &PipelineError, config: &BackoffConfig) -> bool {
    match error {
        PipelineError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        PipelineError::Request(_) => true,
        _ => false,
    }
}

/// Execute a backend call with transport-level retry and exponential backoff.
///
/// Retries transient failures (429, 5xx, connection errors) according to
/// `config`. Returns the first successful response, or the last error once
/// retries are exhausted.
pub async fn with_backoff(
    backend: &dyn Backend,
    request: &LlmRequest,
    config: &BackoffConfig,
) -> Result<LlmResponse> {
    let mut attempt: u32 = 0;

    loop {
        match backend.complete(request).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < config.max_retries && is_retryable(&e, config) => {
                let delay = match &e {
                    PipelineError::HttpError {
                        retry_after: Some(ra),
                        ..
                    } if config.respect_retry_after => *ra,
                    _ => config.delay_for_attempt(attempt),
                };
                attempt += 1;
                warn!(
                    backend = backend.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient backend failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
