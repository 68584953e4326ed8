//! jarvis-ai-gateway: OpenAI-compatible chat completions over a local Ollama server.
//!
//! The gateway is a protocol translator. Non-streaming requests are forwarded
//! to `/api/chat` and reshaped into `chat.completion` objects. Streaming
//! requests relay Ollama's newline-delimited JSON as OpenAI
//! `chat.completion.chunk` Server-Sent Events, always ending in `data: [DONE]`.

pub mod backend;
pub mod config;
pub mod error;
pub mod server;
