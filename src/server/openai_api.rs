//! OpenAI-compatible HTTP API.
//!
//! Implements the subset of the OpenAI API the gateway proxies to Ollama:
//! - POST /chat/completions (also /v1/chat/completions)
//! - GET /v1/models
//! - GET /ollama/models
//! - GET /health
//! - GET /

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::backend::client::OllamaClient;
use crate::backend::ndjson::ndjson_lines;
use crate::config::Config;
use crate::error::{BackendError, GatewayError};
use crate::server::streaming::translate_stream;
use crate::server::translate::{backend_request, completion_id, to_completion_response};

/// Name reported by the health endpoint.
pub const SERVICE_NAME: &str = "myJarvis-ai-service";

/// Application state shared across handlers.
pub struct AppState {
    pub backend: OllamaClient,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self, BackendError> {
        Ok(Self {
            backend: OllamaClient::new(&config.backend)?,
            config,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ollama/models", get(ollama_models))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Chat completion request (OpenAI-compatible).
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

impl ChatCompletionRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        if self.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
        }
        Ok(())
    }
}

/// Chat completion response (non-streaming).
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Token usage. Individual counters are omitted when the backend did not report them.
#[derive(Debug, Serialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    pub total_tokens: u64,
}

/// Model listing response.
#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ollama_status: BackendStatus,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({
        "message": "myJarvis AI Service",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timeout = state.config.backend.health_timeout();
    // A zero timeout disables the probe.
    let ollama_status = if timeout.is_zero() {
        BackendStatus::Unknown
    } else {
        match state.backend.probe(timeout).await {
            Ok(true) => BackendStatus::Healthy,
            Ok(false) => BackendStatus::Unhealthy,
            Err(e) => {
                warn!(error = %e, "Ollama health probe failed");
                BackendStatus::Unhealthy
            }
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ollama_status,
    })
}

/// Always answers 200; failures are reported in the `status` field.
async fn ollama_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let timeout = state.config.backend.models_timeout();
    match state.backend.list_models(timeout).await {
        Ok(data) => Json(json!({ "status": "success", "data": data })),
        Err(BackendError::Status { code, .. }) => Json(json!({
            "status": "error",
            "message": format!("Ollama API returned status {code}"),
        })),
        Err(e) => Json(json!({
            "status": "error",
            "message": format!("Failed to connect to Ollama: {e}"),
        })),
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelList>, GatewayError> {
    let tags = state
        .backend
        .list_models(state.config.backend.models_timeout())
        .await?;

    let data = tags["models"]
        .as_array()
        .map(|models| models.iter().filter_map(model_info).collect())
        .unwrap_or_default();

    Ok(Json(ModelList {
        object: "list".to_string(),
        data,
    }))
}

fn model_info(tag: &Value) -> Option<ModelInfo> {
    let name = tag["name"].as_str().or_else(|| tag["model"].as_str())?;
    let created = tag["modified_at"]
        .as_str()
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp())
        .unwrap_or(0);

    Some(ModelInfo {
        id: name.to_string(),
        object: "model".to_string(),
        created,
        owned_by: "ollama".to_string(),
    })
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(req) = payload.map_err(|e| GatewayError::Rejected {
        status: e.status(),
        message: e.body_text(),
    })?;
    req.validate()?;

    let request_id = completion_id();

    info!(
        request_id = request_id,
        model = req.model,
        messages = req.messages.len(),
        stream = req.stream,
        "Chat completion request"
    );

    if req.stream {
        // Connection errors are reported in-band; the SSE response is always 200.
        let body = state.backend.chat_stream(backend_request(&req, true));
        let lines = ndjson_lines(body, state.config.backend.max_line_bytes);
        let frames = translate_stream(lines, request_id, req.model.clone());
        let events = frames.map(|frame| Ok::<_, Infallible>(frame.into_event()));
        Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
    } else {
        let response = state.backend.chat(&backend_request(&req, false)).await?;
        let completion = to_completion_response(response, request_id, &req.model);
        Ok(Json(completion).into_response())
    }
}
