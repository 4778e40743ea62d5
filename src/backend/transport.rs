//! HTTP transport used by the vendor backends.
//!
//! Backends describe a JSON POST with [`HttpPost`]; a [`Transport`] executes
//! it and hands back the decoded body. [`ReqwestTransport`] is the real
//! implementation; tests substitute a scripted one.

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A JSON POST request.
#[derive(Debug, Clone)]
pub struct HttpPost<'a> {
    pub url: &'a str,
    /// Query-string pairs appended to `url`.
    pub query: Vec<(&'static str, String)>,
    /// Extra request headers.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body. `None` sends an empty POST.
    pub body: Option<&'a Value>,
}

impl<'a> HttpPost<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn json(mut self, body: &'a Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// First six characters of a credential followed by `***`.
pub(crate) fn redact_key(key: &str) -> String {
    match key.char_indices().nth(6) {
        Some((idx, _)) => format!("{}***", &key[..idx]),
        None => "***".to_string(),
    }
}

/// Executes JSON POST requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and decode a 2xx response body as JSON.
    ///
    /// Non-2xx responses become [`PipelineError::HttpError`].
    async fn post_json(&self, request: HttpPost<'_>) -> Result<Value>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PipelineError::InvalidConfig(format!("failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }

    /// Reuse an existing client (its own timeout applies).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, request: HttpPost<'_>) -> Result<Value> {
        let mut req = self.client.post(request.url);
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(*name, value.as_str());
        }
        if let Some(body) = request.body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            ReqwestTransport::parse_retry_after(" 12 "),
            Some(Duration::from_secs(12))
        );
        assert_eq!(ReqwestTransport::parse_retry_after("soon"), None);
    }

    #[test]
    fn test_redact_key() {
        assert_eq!(redact_key("sk-abcdefgh"), "sk-abc***");
        assert_eq!(redact_key("short"), "***");
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(DEFAULT_TIMEOUT).is_ok());
    }

    /// Read one HTTP request (head plus `Content-Length` body).
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve a single connection with `response`, after `stall`.
    async fn serve_once(response: &'static str, stall: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            tokio::time::sleep(stall).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/chat", addr)
    }

    #[tokio::test]
    async fn test_reqwest_transport_decodes_json() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}",
            Duration::ZERO,
        )
        .await;
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap();
        let body = json!({"messages": []});
        let resp = transport
            .post_json(HttpPost::new(&url).query("access_token", "t").json(&body))
            .await
            .unwrap();
        assert_eq!(resp, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_reqwest_transport_non_2xx_is_http_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nRetry-After: 2\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
            Duration::ZERO,
        )
        .await;
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap();
        let err = transport.post_json(HttpPost::new(&url)).await.unwrap_err();
        match err {
            PipelineError::HttpError {
                status,
                body,
                retry_after,
            } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected HttpError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reqwest_transport_non_json_body_is_json_error() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 13\r\nConnection: close\r\n\r\n<html></html>",
            Duration::ZERO,
        )
        .await;
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap();
        let err = transport.post_json(HttpPost::new(&url)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[tokio::test]
    async fn test_reqwest_transport_timeout_bounds_call() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
            Duration::from_secs(10),
        )
        .await;
        let transport = ReqwestTransport::new(Duration::from_millis(100)).unwrap();
        let started = std::time::Instant::now();
        let err = transport.post_json(HttpPost::new(&url)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Request(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_scripted_transport_records_and_replays() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"ok": true}))]);
        let body = json!({"x": 1});
        let resp = transport
            .post_json(
                HttpPost::new("http://host/path")
                    .query("a", "b")
                    .header("Authorization", "Bearer k")
                    .json(&body),
            )
            .await
            .unwrap();
        assert_eq!(resp, json!({"ok": true}));

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query_value("a"), Some("b"));
        assert_eq!(calls[0].body, Some(json!({"x": 1})));

        let exhausted = transport.post_json(HttpPost::new("http://host")).await;
        assert!(exhausted.is_err());
    }
}
