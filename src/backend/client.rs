//! HTTP client for the Ollama API.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::{Client, Response};
use tracing::{debug, instrument};

use crate::backend::types::{OllamaChatRequest, OllamaChatResponse};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// Thin wrapper over a pooled `reqwest::Client` pointed at one Ollama server.
///
/// The underlying client has no global timeout; bounded calls set one per
/// request so streaming generation can run as long as the model needs.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    chat_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_timeout: config.chat_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/tags`, returning the backend payload untouched.
    #[instrument(skip(self))]
    pub async fn list_models(&self, timeout: Duration) -> Result<serde_json::Value, BackendError> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Reachability check: `true` only for a 200 from `/api/tags`.
    pub async fn probe(&self, timeout: Duration) -> Result<bool, BackendError> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    /// Single-shot `POST /api/chat` with `stream=false`.
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn chat(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse, BackendError> {
        debug!(messages = request.messages.len(), "Sending chat request");

        let response = self
            .http
            .post(self.url("/api/chat"))
            .timeout(self.chat_timeout)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    /// Streaming `POST /api/chat`.
    ///
    /// Nothing is sent until the stream is first polled. Connect failures and
    /// non-2xx statuses surface as the first item. Dropping the stream closes
    /// the connection.
    pub fn chat_stream(
        &self,
        request: OllamaChatRequest,
    ) -> impl Stream<Item = Result<Bytes, BackendError>> + Send + 'static {
        let http = self.http.clone();
        let url = self.url("/api/chat");

        let connect = async move {
            debug!(model = %request.model, "Opening chat stream");
            let response = http.post(url).json(&request).send().await?;
            let response = ensure_success(response).await?;
            Ok::<_, BackendError>(response.bytes_stream().map_err(BackendError::from))
        };

        stream::once(connect).try_flatten()
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        code: status.as_u16(),
        body,
    })
}
