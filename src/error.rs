//! Error types and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while talking to the Ollama backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connect failure, timeout, or the connection dropped mid-body.
    #[error("{0}")]
    Unavailable(String),

    /// Backend answered with a non-2xx status.
    #[error("Ollama API returned status {code}: {body}")]
    Status { code: u16, body: String },

    /// Backend answered 2xx with a body we could not decode.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_body() {
            BackendError::Unavailable(e.to_string())
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by the gateway's handlers.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Body extraction failed; `status` is the extractor's own (400, 415, 422).
    #[error("invalid request body: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// `{"error": {...}}` envelope, shared by JSON responses and in-band SSE events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: u16,
}

impl GatewayError {
    /// HTTP status and envelope for this error.
    pub fn error_body(&self) -> (StatusCode, ErrorEnvelope) {
        let (status, kind, message) = match self {
            GatewayError::Backend(BackendError::Unavailable(msg)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                format!("Ollama service unavailable: {msg}"),
            ),
            GatewayError::Backend(BackendError::Status { code, body }) => (
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY),
                "backend_error",
                format!("Ollama API error ({code}): {body}"),
            ),
            GatewayError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg.clone())
            }
            GatewayError::Rejected { status, message } => {
                (*status, "invalid_request_error", message.clone())
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                other.to_string(),
            ),
        };

        let envelope = ErrorEnvelope {
            error: ErrorDetail {
                message,
                kind: kind.to_string(),
                code: status.as_u16(),
            },
        };
        (status, envelope)
    }

    /// Envelope for a failure that happens after SSE headers were sent.
    ///
    /// Only two classes exist in-band: unavailable (503) and internal (500).
    pub fn stream_error_body(&self) -> ErrorEnvelope {
        let (kind, code, message) = match self {
            GatewayError::Backend(BackendError::Unavailable(msg)) => (
                "service_unavailable",
                503,
                format!("Ollama service unavailable: {msg}"),
            ),
            other => ("internal_server_error", 500, other.to_string()),
        };
        ErrorEnvelope {
            error: ErrorDetail {
                message,
                kind: kind.to_string(),
                code,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = self.error_body();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}
