//! [`ChatBackendPort`] over an OpenAI-compatible upstream server.

mod error;
mod sse;
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lmbridge_core::{
    BackendError, BackendModelInfo, BackendRequest, BackendResponse, ChatBackendPort,
    GatewaySettings,
};
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use error::UpstreamError;
pub use sse::fragments;

/// Connection settings for the upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL, without the `/v1` suffix.
    pub base_url: String,
    /// Context window assumed when a model listing does not report one.
    pub default_context: u32,
    /// Bearer token sent upstream, if the server wants one.
    pub api_key: Option<String>,
    /// Use llama-server's `/tokenize` for exact prompt counts.
    pub tokenize: bool,
    /// Whether the upstream accepts `image_url` data URLs.
    pub image_input: bool,
    pub connect_timeout: Duration,
}

impl UpstreamConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            base_url: settings.upstream_url.clone(),
            default_context: settings.upstream_default_context,
            ..Self::default()
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            default_context: 8192,
            api_key: None,
            tokenize: false,
            image_input: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Chat backend that forwards to an upstream server over HTTP.
#[derive(Debug, Clone)]
pub struct UpstreamBackend {
    client: Client,
    base: Url,
    config: UpstreamConfig,
}

/// Response from llama-server's `/tokenize`.
#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<serde_json::Value>,
}

impl UpstreamBackend {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let trimmed = config.base_url.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|_| UpstreamError::InvalidUrl(config.base_url.clone()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidUrl(config.base_url));
        }

        // No overall timeout: streams can legitimately run for minutes and
        // the gateway enforces its own deadline.
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { client, base, config })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::other(format!("invalid upstream path '{path}': {e}")))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Map a non-success response to a typed error, consuming its body.
    async fn failure(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error::map_status(status, &body)
    }
}

#[async_trait]
impl ChatBackendPort for UpstreamBackend {
    async fn list_models(&self) -> Result<Vec<BackendModelInfo>, BackendError> {
        let url = self.endpoint("v1/models")?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| error::map_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let list: wire::ModelList = response
            .json()
            .await
            .map_err(|e| BackendError::other(format!("invalid model list from upstream: {e}")))?;
        let models: Vec<BackendModelInfo> = list
            .data
            .into_iter()
            .map(|m| m.into_info(self.config.default_context))
            .collect();
        debug!(count = models.len(), "Upstream models listed");
        Ok(models)
    }

    async fn send_request(
        &self,
        request: BackendRequest,
        cancel: CancellationToken,
    ) -> Result<BackendResponse, BackendError> {
        let url = self.endpoint("v1/chat/completions")?;
        let body = wire::chat_body(&request);
        let send = self
            .authorized(self.client.post(url))
            .header("accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(BackendError::other("request cancelled before upstream responded"));
            }
            result = send => result.map_err(|e| error::map_transport(&e))?,
        };
        if !response.status().is_success() {
            let err = Self::failure(response).await;
            warn!(model = %request.model_id, error = %err, "Upstream rejected chat request");
            return Err(err);
        }

        // Dropping the byte stream closes the upstream connection.
        let stream = fragments(response.bytes_stream()).take_until(cancel.cancelled_owned());
        Ok(BackendResponse::new(stream.boxed()))
    }

    async fn count_tokens(&self, _model_id: &str, text: &str) -> Option<u32> {
        if !self.config.tokenize {
            return None;
        }
        let url = self.endpoint("tokenize").ok()?;
        let response = self
            .authorized(self.client.post(url))
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "Upstream tokenize unavailable");
            return None;
        }
        let parsed: TokenizeResponse = response.json().await.ok()?;
        u32::try_from(parsed.tokens.len()).ok()
    }

    fn supports_image_input(&self) -> bool {
        self.config.image_input
    }
}
