//! HTTP server providing an OpenAI-compatible API.
//!
//! - [`openai_api`]: Request/response types and route handlers
//! - [`streaming`]: SSE streaming for token-by-token responses
//! - [`translate`]: Mapping between OpenAI and Ollama payloads

pub mod openai_api;
pub mod streaming;
pub mod translate;

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
