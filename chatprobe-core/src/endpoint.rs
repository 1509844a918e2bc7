use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::{HttpCfg, ProbeTarget};
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::model::ChatRequest;
use crate::stream::ContentStream;

/// A chat-completion endpoint the harness can probe.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Human-readable location, used in reports and logs.
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    /// Send a non-streaming request and return the whole JSON body.
    async fn complete(&self, req: &ChatRequest) -> CoreResult<Value>;
    /// Send a streaming request. Transport and status failures surface here,
    /// before any increment is decoded.
    async fn stream(&self, req: &ChatRequest) -> CoreResult<ContentStream>;
}

/// OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    http: HttpClient,
    base: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiCompatible {
    pub fn new(http: HttpClient, target: ProbeTarget) -> Self {
        Self {
            http,
            base: target.endpoint.trim_end_matches('/').to_string(),
            model: target.model,
            api_key: target.credential,
        }
    }

    /// Build the HTTP client from `http`, with the target's timeout taking precedence.
    pub fn from_target(target: ProbeTarget, http: &HttpCfg) -> CoreResult<Self> {
        let cfg = HttpCfg {
            request_timeout_ms: target.timeout.as_millis() as u64,
            ..http.clone()
        };
        Ok(Self::new(HttpClient::new(&cfg)?, target))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAiCompatible::new(
            HttpClient::new_default().unwrap(),
            ProbeTarget {
                endpoint: server_base.to_string(),
                credential: SecretString::new("test-key".into()),
                model: "claude-3-5-sonnet-latest".into(),
                timeout: std::time::Duration::from_secs(30),
            },
        )
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base)
    }

    /// Extra request headers; reqwest's `.json()` already sets `Content-Type`.
    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )]
    }
}

#[async_trait]
impl ChatEndpoint for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.base
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: &ChatRequest) -> CoreResult<Value> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (body, request_id, latency_ms) = self
            .http
            .post_json::<_, Value>(&self.url(), req, &hdrs)
            .await?;
        tracing::debug!(request_id = request_id.as_deref(), latency_ms, "completion received");
        Ok(body)
    }

    async fn stream(&self, req: &ChatRequest) -> CoreResult<ContentStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let lines = self.http.post_sse_lines(&self.url(), req, &hdrs).await?;
        Ok(ContentStream::new(lines))
    }
}
