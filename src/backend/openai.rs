//! Backend for OpenAI-compatible chat-completions APIs.
//!
//! [`OpenAiBackend`] covers OpenAI itself and any server exposing the same
//! `/chat/completions` contract (vLLM, llama.cpp server, LM Studio, Groq,
//! Together AI, Ollama's `/v1/` endpoint, ...).
//!
//! Endpoint: `POST {base_url}/chat/completions` with `Authorization: Bearer`.

use super::transport::{redact_key, HttpPost, ReqwestTransport, Transport};
use super::{Backend, LlmRequest, LlmResponse};
use crate::client::{BackendClient, Params};
use crate::config::{params_object, take_optional_str, take_required_str, take_transport_settings};
use crate::error::Result;
use crate::types::TokenUsage;
use crate::PipelineError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use prompt_pipeline::backend::{OpenAiBackend, ReqwestTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30)).unwrap());
/// let backend = OpenAiBackend::new("https://api.openai.com/v1", "sk-...", transport)
///     .with_organization("org-123");
/// assert!(backend.has_organization());
/// ```
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    /// Optional organization ID. If set, sent as `OpenAI-Organization: {org}`.
    organization: Option<String>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_key(&self.api_key))
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            organization: None,
            transport,
        }
    }

    /// Set the organization ID header.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Returns `true` if an organization ID has been configured.
    pub fn has_organization(&self) -> bool {
        self.organization.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Build the request body: sampling params, then `model` and `messages`.
    fn build_body(request: &LlmRequest) -> Value {
        let mut body = serde_json::Map::new();
        for (key, value) in &request.params {
            body.insert(key.clone(), value.clone());
        }
        body.insert("model".into(), Value::String(request.model.clone()));
        body.insert("messages".into(), Value::Array(request.messages()));
        Value::Object(body)
    }

    fn interpret(result: &Value) -> Result<LlmResponse> {
        if let Some(error) = result.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(PipelineError::Backend { code: 0, message });
        }

        let text = result
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::Other(format!(
                    "response has no choices[0].message.content: {}",
                    crate::parsing::truncate(&result.to_string(), 200)
                ))
            })?;

        let total = result
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(LlmResponse {
            text: text.to_string(),
            usage: TokenUsage::Total(total),
        })
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = self.endpoint();
        let body = Self::build_body(request);

        let mut post = HttpPost::new(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        if let Some(org) = &self.organization {
            post = post.header("OpenAI-Organization", org.as_str());
        }

        let result = self.transport.post_json(post).await?;
        Self::interpret(&result)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Build a client from `openai` stage parameters.
///
/// Required: `api_key`, `base_url`, `model_name`. Optional: `organization`,
/// `timeout` (seconds), `backoff` (preset name). Every other key becomes a
/// default request parameter.
pub fn client_from_params(params: &Value) -> Result<BackendClient> {
    let what = "openai client";
    let mut params: Params = params_object(params, what)?;
    let api_key = take_required_str(&mut params, "api_key", what)?;
    let base_url = take_required_str(&mut params, "base_url", what)?;
    let model = take_required_str(&mut params, "model_name", what)?;
    let organization = take_optional_str(&mut params, "organization", what)?;

    let settings = take_transport_settings(&mut params, what)?;
    let transport = Arc::new(ReqwestTransport::new(settings.timeout)?);
    let mut backend = OpenAiBackend::new(base_url, api_key, transport);
    if let Some(org) = organization {
        backend = backend.with_organization(org);
    }

    Ok(BackendClient::new(Arc::new(backend), model)
        .with_defaults(params)
        .with_backoff(settings.backoff))
}
