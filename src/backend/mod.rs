//! Ollama backend access.
//!
//! - [`client`]: HTTP client for `/api/tags` and `/api/chat`
//! - [`ndjson`]: Re-framing of a streamed body into newline-delimited records
//! - [`types`]: Ollama wire types

pub mod client;
pub mod ndjson;
pub mod types;
