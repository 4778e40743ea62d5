//! Backend for Baidu Qianfan (ERNIE) chat models.
//!
//! Authentication is an OAuth client-credentials grant: an access token is
//! fetched lazily from `token_url`, cached, and sent as a query parameter on
//! every chat call. The server decides when a token expires; the backend only
//! learns about it from error codes 110/111, at which point it refreshes the
//! token and retries the call exactly once. The refresh budget travels with the
//! [`LlmRequest`], so transport retries of the same call do not earn another.
//!
//! Endpoint: `POST {api_base_url}/{model}?access_token=...`

use super::transport::{redact_key, HttpPost, ReqwestTransport, Transport};
use super::{Backend, LlmRequest, LlmResponse};
use crate::client::{merge_params, BackendClient, Params};
use crate::config::{params_object, take_optional_str, take_required_str, take_transport_settings};
use crate::error::Result;
use crate::types::TokenUsage;
use crate::PipelineError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Model used when the configuration names none.
pub const DEFAULT_MODEL: &str = "ernie-lite-8k";

/// `error_code` values meaning "access token invalid or expired".
pub const TOKEN_INVALID_CODES: [i64; 2] = [110, 111];

/// Backend for Baidu's ERNIE chat API.
///
/// Each instance owns its access token; tokens are never shared between
/// instances, even for the same account.
pub struct BaiduBackend {
    api_key: String,
    secret_key: String,
    token_url: String,
    api_base_url: String,
    transport: Arc<dyn Transport>,
    access_token: Mutex<Option<String>>,
}

impl std::fmt::Debug for BaiduBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaiduBackend")
            .field("api_key", &redact_key(&self.api_key))
            .field("secret_key", &"***")
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl BaiduBackend {
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        token_url: impl Into<String>,
        api_base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            token_url: token_url.into(),
            api_base_url: api_base_url.into(),
            transport,
            access_token: Mutex::new(None),
        }
    }

    /// Vendor sampling defaults, the lowest parameter layer.
    pub fn default_params() -> Params {
        let mut params = Params::new();
        params.insert("temperature".into(), json!(0.95));
        params.insert("top_p".into(), json!(0.7));
        params.insert("penalty_score".into(), json!(1.0));
        params
    }

    /// Cached token, fetching one first if none is held.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.access_token.lock().await = None;
    }

    async fn fetch_token(&self) -> Result<String> {
        debug!(token_url = %self.token_url, "fetching access token");
        let request = HttpPost::new(&self.token_url)
            .query("grant_type", "client_credentials")
            .query("client_id", self.api_key.as_str())
            .query("client_secret", self.secret_key.as_str());

        let result = self
            .transport
            .post_json(request)
            .await
            .map_err(|e| PipelineError::Auth(format!("token request failed: {}", e)))?;

        result
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::Auth(format!("failed to obtain access token: {}", result))
            })
    }

    fn build_body(request: &LlmRequest) -> Value {
        let mut body = serde_json::Map::new();
        for (key, value) in &request.params {
            body.insert(key.clone(), value.clone());
        }
        body.insert("messages".into(), Value::Array(request.messages()));
        Value::Object(body)
    }

    /// Translate a chat reply, classifying vendor error codes.
    fn interpret(result: &Value) -> Result<LlmResponse> {
        if let Some(code) = result.get("error_code").and_then(Value::as_i64) {
            let message = result
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if TOKEN_INVALID_CODES.contains(&code) {
                return Err(PipelineError::Auth(format!(
                    "access token rejected (error_code {}): {}",
                    code, message
                )));
            }
            return Err(PipelineError::Backend { code, message });
        }

        let usage = result.get("usage");
        let count = |field: &str| {
            usage
                .and_then(|u| u.get(field))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };

        Ok(LlmResponse {
            text: result
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            usage: TokenUsage::Detailed {
                prompt_tokens: count("prompt_tokens"),
                completion_tokens: count("completion_tokens"),
                total_tokens: count("total_tokens"),
            },
        })
    }

    /// One chat call with whatever token is current.
    async fn attempt(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let token = self.access_token().await?;
        let url = format!("{}/{}", self.api_base_url.trim_end_matches('/'), request.model);
        let body = Self::build_body(request);

        let result = self
            .transport
            .post_json(HttpPost::new(&url).query("access_token", token).json(&body))
            .await?;

        Self::interpret(&result)
    }
}

#[async_trait]
impl Backend for BaiduBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let after_refresh = |e: PipelineError| match e {
            PipelineError::Auth(again) => {
                PipelineError::Auth(format!("{} (after one token refresh)", again))
            }
            other => other,
        };

        match self.attempt(request).await {
            Err(PipelineError::Auth(reason)) if request.refresh.take() => {
                warn!(backend = "baidu", %reason, "refreshing access token and retrying once");
                self.invalidate_token().await;
                self.attempt(request).await.map_err(after_refresh)
            }
            Err(e) if request.refresh.is_spent() => Err(after_refresh(e)),
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "baidu"
    }

    fn usage_shape(&self) -> TokenUsage {
        TokenUsage::zero_detailed()
    }
}

/// Build a client from `baidu` stage parameters.
///
/// Required: `api_key`, `secret_key`, `urls.token_url`, `urls.api_base_url`.
/// Optional: `model` (default [`DEFAULT_MODEL`]), `timeout` (seconds),
/// `backoff` (preset name). Every other key becomes a default request
/// parameter layered over [`BaiduBackend::default_params`].
pub fn client_from_params(params: &Value) -> Result<BackendClient> {
    let what = "baidu client";
    let mut params = params_object(params, what)?;
    let api_key = take_required_str(&mut params, "api_key", what)?;
    let secret_key = take_required_str(&mut params, "secret_key", what)?;
    let model = take_optional_str(&mut params, "model", what)?
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let urls_value = params.remove("urls").unwrap_or(Value::Null);
    let mut urls = params_object(&urls_value, "baidu client urls")?;
    let token_url = take_required_str(&mut urls, "token_url", "baidu client urls")?;
    let api_base_url = take_required_str(&mut urls, "api_base_url", "baidu client urls")?;

    let settings = take_transport_settings(&mut params, what)?;
    let transport = Arc::new(ReqwestTransport::new(settings.timeout)?);
    let backend = BaiduBackend::new(api_key, secret_key, token_url, api_base_url, transport);

    Ok(BackendClient::new(Arc::new(backend), model)
        .with_defaults(merge_params(&[&BaiduBackend::default_params(), &params]))
        .with_backoff(settings.backoff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transport::testing::ScriptedTransport;
    use crate::backend::BackoffConfig;
    use crate::client::LlmClient;
    use std::time::Duration;

    const TOKEN_URL: &str = "https://auth.test/oauth/2.0/token";
    const API_URL: &str = "https://api.test/chat";

    fn backend(transport: &Arc<ScriptedTransport>) -> BaiduBackend {
        BaiduBackend::new("ak-123456789", "sk-secret", TOKEN_URL, API_URL, transport.clone())
    }

    fn token(value: &str) -> Result<Value> {
        Ok(json!({"access_token": value, "expires_in": 2592000}))
    }

    fn chat_ok(text: &str) -> Result<Value> {
        Ok(json!({
            "result": text,
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }))
    }

    fn chat_error(code: i64) -> Result<Value> {
        Ok(json!({"error_code": code, "error_msg": "Access token invalid or no longer valid"}))
    }

    #[tokio::test]
    async fn test_token_fetched_lazily_and_cached() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            chat_ok("first"),
            chat_ok("second"),
        ]));
        let backend = backend(&transport);
        assert!(transport.calls().is_empty());

        let request = LlmRequest::new("ernie-lite-8k", "hi");
        assert_eq!(backend.complete(&request).await.unwrap().text, "first");
        assert_eq!(backend.complete(&request).await.unwrap().text, "second");

        assert_eq!(transport.calls_to(TOKEN_URL), 1);
        let calls = transport.calls();
        assert_eq!(calls[0].query_value("grant_type"), Some("client_credentials"));
        assert_eq!(calls[0].query_value("client_id"), Some("ak-123456789"));
        assert_eq!(calls[1].url, format!("{}/ernie-lite-8k", API_URL));
        assert_eq!(calls[2].query_value("access_token"), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            chat_error(111),
            token("tok-2"),
            chat_ok("after refresh"),
        ]));
        let backend = backend(&transport);

        let resp = backend.complete(&LlmRequest::new("m", "hi")).await.unwrap();
        assert_eq!(resp.text, "after refresh");
        assert_eq!(resp.usage.total(), 12);

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1].query_value("access_token"), Some("tok-1"));
        assert_eq!(calls[3].query_value("access_token"), Some("tok-2"));
    }

    #[tokio::test]
    async fn test_second_auth_failure_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            chat_error(110),
            token("tok-2"),
            chat_error(110),
            token("tok-3"),
            chat_ok("must never be reached"),
        ]));
        let backend = backend(&transport);

        let err = backend.complete(&LlmRequest::new("m", "hi")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(ref msg) if msg.contains("after one token refresh")));
        assert_eq!(transport.calls().len(), 4);
        assert_eq!(transport.calls_to(TOKEN_URL), 2);
    }

    #[tokio::test]
    async fn test_second_auth_failure_becomes_zero_token_envelope() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            chat_error(111),
            token("tok-2"),
            chat_error(111),
        ]));
        let client = BackendClient::new(Arc::new(backend(&transport)), "ernie-lite-8k");

        let reply = client.response("hi", &Params::new()).await;
        assert!(reply.is_failure());
        assert!(reply.tokens.is_zero());
        assert!(matches!(reply.tokens, TokenUsage::Detailed { .. }));
        assert!(reply.content.contains("error_code 111"));
        assert_eq!(reply.model, "ernie-lite-8k");
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_backoff_retry_does_not_earn_second_refresh() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            chat_error(111),
            token("tok-2"),
            Err(PipelineError::HttpError {
                status: 503,
                body: "busy".into(),
                retry_after: None,
            }),
            chat_error(111),
            token("tok-3"),
            chat_ok("must never be reached"),
        ]));
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..BackoffConfig::standard()
        };
        let client = BackendClient::new(Arc::new(backend(&transport)), "ernie-lite-8k")
            .with_backoff(backoff);

        let reply = client.response("hi", &Params::new()).await;
        assert!(reply.is_failure());
        assert!(reply.tokens.is_zero());
        assert!(reply.content.contains("after one token refresh"));
        assert_eq!(transport.calls_to(TOKEN_URL), 2);
        assert_eq!(transport.calls_to(API_URL), 3);
    }

    #[tokio::test]
    async fn test_transient_error_before_refresh_keeps_budget() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            Err(PipelineError::HttpError {
                status: 503,
                body: "busy".into(),
                retry_after: None,
            }),
            chat_error(110),
            token("tok-2"),
            chat_ok("recovered"),
        ]));
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..BackoffConfig::standard()
        };
        let client = BackendClient::new(Arc::new(backend(&transport)), "ernie-lite-8k")
            .with_backoff(backoff);

        let reply = client.response("hi", &Params::new()).await;
        assert!(!reply.is_failure());
        assert_eq!(reply.content, "recovered");
        assert_eq!(transport.calls_to(TOKEN_URL), 2);
    }

    #[tokio::test]
    async fn test_token_fetch_failure_retried_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(json!({"error": "invalid_client", "error_description": "unknown client id"})),
            Ok(json!({"error": "invalid_client"})),
        ]));
        let backend = backend(&transport);

        let err = backend.complete(&LlmRequest::new("m", "hi")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
        assert_eq!(transport.calls_to(TOKEN_URL), 2);
        assert_eq!(transport.calls_to(API_URL), 0);
    }

    #[tokio::test]
    async fn test_other_error_code_not_refreshed() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            token("tok-1"),
            Ok(json!({"error_code": 336003, "error_msg": "invalid argument"})),
        ]));
        let backend = backend(&transport);

        let err = backend.complete(&LlmRequest::new("m", "hi")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Backend { code: 336003, .. }));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_body_layers_defaults_config_and_overrides() {
        let transport = Arc::new(ScriptedTransport::new(vec![token("t"), chat_ok("ok")]));
        let mut config_layer = Params::new();
        config_layer.insert("top_p".into(), json!(0.5));
        config_layer.insert("user_id".into(), json!("u-1"));
        let client = BackendClient::new(Arc::new(backend(&transport)), "ernie-lite-8k")
            .with_defaults(merge_params(&[&BaiduBackend::default_params(), &config_layer]));

        let mut overrides = Params::new();
        overrides.insert("temperature".into(), json!(0.2));
        overrides.insert(
            "history".into(),
            json!([{"role": "user", "content": "earlier"}, {"role": "assistant", "content": "reply"}]),
        );
        let reply = client.response("now", &overrides).await;
        assert!(!reply.is_failure());

        let body = transport.calls()[1].body.clone().unwrap();
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["top_p"], json!(0.5));
        assert_eq!(body["penalty_score"], json!(1.0));
        assert_eq!(body["user_id"], json!("u-1"));
        assert!(body.get("history").is_none());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], json!({"role": "user", "content": "now"}));
    }

    #[test]
    fn test_client_from_params_requires_credentials_and_urls() {
        let missing_secret = json!({
            "api_key": "ak",
            "urls": {"token_url": TOKEN_URL, "api_base_url": API_URL}
        });
        assert!(matches!(
            client_from_params(&missing_secret),
            Err(PipelineError::InvalidConfig(ref msg)) if msg.contains("secret_key")
        ));

        let missing_urls = json!({"api_key": "ak", "secret_key": "sk"});
        assert!(matches!(
            client_from_params(&missing_urls),
            Err(PipelineError::InvalidConfig(ref msg)) if msg.contains("token_url")
        ));
    }

    #[test]
    fn test_client_from_params_defaults() {
        let client = client_from_params(&json!({
            "api_key": "ak",
            "secret_key": "sk",
            "urls": {"token_url": TOKEN_URL, "api_base_url": API_URL},
            "temperature": 0.3,
            "timeout": 10
        }))
        .unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.defaults()["temperature"], json!(0.3));
        assert_eq!(client.defaults()["top_p"], json!(0.7));
        assert!(client.defaults().get("timeout").is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let transport = Arc::new(ScriptedTransport::default());
        let rendered = format!("{:?}", backend(&transport));
        assert!(rendered.contains("ak-123***"));
        assert!(!rendered.contains("sk-secret"));
    }
}
