//! Ollama wire types.
//!
//! Only the fields the gateway reads are modelled; everything else the
//! backend sends is ignored by serde.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Sampling options forwarded from the OpenAI request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl OllamaOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Non-streaming response. Accepts both the chat shape (`message`) and the
/// generate shape (`response`).
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

/// One line of a streamed `/api/chat` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaStreamLine {
    #[serde(default)]
    pub message: Option<StreamMessage>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl OllamaStreamLine {
    /// Delta text of this line; empty when the backend sent none.
    pub fn content(&self) -> String {
        self.message
            .as_ref()
            .and_then(|m| m.content.clone())
            .or_else(|| self.response.clone())
            .unwrap_or_default()
    }
}
