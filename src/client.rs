//! The client contract: prompt in, [`ReplyEnvelope`] out, never an error.

use crate::backend::{
    with_backoff, Backend, BackoffConfig, ChatMessage, LlmRequest, RefreshBudget,
};
use crate::error::Result;
use crate::types::{ReplyEnvelope, TokenUsage};
use crate::PipelineError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Free-form request parameters (temperature, top_p, vendor extras, ...).
pub type Params = Map<String, Value>;

/// Shallow-merge parameter layers left to right; later layers win.
///
/// The usual order is vendor defaults, client configuration, per-call
/// overrides. Inputs are left untouched.
///
/// # Example
///
/// ```
/// use prompt_pipeline::client::{merge_params, Params};
/// use serde_json::json;
///
/// let mut defaults = Params::new();
/// defaults.insert("temperature".into(), json!(0.95));
/// defaults.insert("top_p".into(), json!(0.7));
/// let mut overrides = Params::new();
/// overrides.insert("temperature".into(), json!(0.1));
///
/// let merged = merge_params(&[&defaults, &overrides]);
/// assert_eq!(merged["temperature"], json!(0.1));
/// assert_eq!(merged["top_p"], json!(0.7));
/// ```
pub fn merge_params(layers: &[&Params]) -> Params {
    let mut merged = Params::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Turns a prompt into a normalized reply.
///
/// Implementations own their credentials and retry behaviour. `response`
/// never fails: dispatch, authentication and decoding problems all come back
/// as a failure envelope with zero token counts.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt`, with `overrides` layered over the client's defaults.
    async fn response(&self, prompt: &str, overrides: &Params) -> ReplyEnvelope;

    /// Default model identifier.
    fn model(&self) -> &str;

    /// Token layout of this client's replies.
    fn usage_shape(&self) -> TokenUsage {
        TokenUsage::Total(0)
    }
}

/// [`LlmClient`] over any [`Backend`].
///
/// Recognised override keys: `model` switches the model for one call and
/// `history` (array of `{role, content}`) is sent ahead of the prompt. All
/// other keys reach the vendor verbatim.
pub struct BackendClient {
    backend: Arc<dyn Backend>,
    model: String,
    defaults: Params,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("defaults", &self.defaults)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl BackendClient {
    pub fn new(backend: Arc<dyn Backend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            defaults: Params::new(),
            backoff: BackoffConfig::none(),
        }
    }

    /// Replace the default parameter layer.
    pub fn with_defaults(mut self, defaults: Params) -> Self {
        self.defaults = defaults;
        self
    }

    /// Transport retry policy for each call.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn defaults(&self) -> &Params {
        &self.defaults
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn build_request(&self, prompt: &str, overrides: &Params) -> Result<LlmRequest> {
        let mut params = merge_params(&[&self.defaults, overrides]);

        let model = match params.remove("model") {
            None => self.model.clone(),
            Some(Value::String(model)) => model,
            Some(other) => {
                return Err(PipelineError::config(format!(
                    "'model' override must be a string, got {}",
                    other
                )))
            }
        };

        let history: Vec<ChatMessage> = match params.remove("history") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                PipelineError::config(format!(
                    "'history' must be an array of {{role, content}} messages: {}",
                    e
                ))
            })?,
        };

        Ok(LlmRequest {
            model,
            prompt: prompt.to_string(),
            history,
            params,
            refresh: RefreshBudget::default(),
        })
    }
}

#[async_trait]
impl LlmClient for BackendClient {
    async fn response(&self, prompt: &str, overrides: &Params) -> ReplyEnvelope {
        let request = match self.build_request(prompt, overrides) {
            Ok(request) => request,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "rejected call overrides");
                return ReplyEnvelope::failure(e, self.usage_shape(), &self.model);
            }
        };

        debug!(
            backend = self.backend.name(),
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "dispatching prompt"
        );

        match with_backoff(self.backend.as_ref(), &request, &self.backoff).await {
            Ok(response) => ReplyEnvelope::success(response.text, response.usage, request.model),
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    model = %request.model,
                    error = %e,
                    "client call failed"
                );
                ReplyEnvelope::failure(e, self.usage_shape(), request.model)
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn usage_shape(&self) -> TokenUsage {
        self.backend.usage_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Role};
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_merge_params_override_wins() {
        let base = params(json!({"temperature": 0.95, "top_p": 0.7, "penalty_score": 1.0}));
        let config = params(json!({"top_p": 0.5, "user_id": "u"}));
        let call = params(json!({"temperature": 0.1}));

        let merged = merge_params(&[&base, &config, &call]);
        assert_eq!(
            Value::Object(merged),
            json!({"temperature": 0.1, "top_p": 0.5, "penalty_score": 1.0, "user_id": "u"})
        );
        assert_eq!(base["temperature"], json!(0.95));
    }

    #[test]
    fn test_merge_params_is_shallow() {
        let base = params(json!({"extra": {"a": 1, "b": 2}}));
        let call = params(json!({"extra": {"a": 3}}));
        let merged = merge_params(&[&base, &call]);
        assert_eq!(merged["extra"], json!({"a": 3}));
    }

    #[test]
    fn test_build_request_extracts_model_and_history() {
        let client = BackendClient::new(Arc::new(MockBackend::fixed("x")), "base-model")
            .with_defaults(params(json!({"temperature": 0.3})));
        let overrides = params(json!({
            "model": "other-model",
            "history": [{"role": "system", "content": "be brief"}]
        }));

        let request = client.build_request("hi", &overrides).unwrap();
        assert_eq!(request.model, "other-model");
        assert_eq!(request.history[0].role, Role::System);
        assert_eq!(request.params, params(json!({"temperature": 0.3})));
    }

    #[tokio::test]
    async fn test_response_success_envelope() {
        let mock = Arc::new(MockBackend::fixed("{\"text\": \"hi\"}"));
        let client = BackendClient::new(mock.clone(), "mock-model");

        let reply = client.response("hello there", &Params::new()).await;
        assert!(!reply.is_failure());
        assert_eq!(reply.content, "{\"text\": \"hi\"}");
        assert_eq!(reply.model, "mock-model");
        assert_eq!(mock.prompts(), vec!["hello there".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_history_becomes_failure_envelope() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let client = BackendClient::new(mock.clone(), "m");

        let reply = client
            .response("p", &params(json!({"history": "not a list"})))
            .await;
        assert!(reply.is_failure());
        assert!(reply.tokens.is_zero());
        assert!(mock.prompts().is_empty());
    }
}
