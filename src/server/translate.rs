//! Mapping between OpenAI request/response objects and Ollama payloads.

use uuid::Uuid;

use crate::backend::types::{OllamaChatRequest, OllamaChatResponse, OllamaMessage, OllamaOptions};
use crate::server::openai_api::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Role, Usage,
};
use crate::server::unix_now;

/// Fresh opaque completion id.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

/// Build the `/api/chat` body for an OpenAI request.
pub fn backend_request(req: &ChatCompletionRequest, stream: bool) -> OllamaChatRequest {
    let options = OllamaOptions {
        temperature: req.temperature,
        top_p: req.top_p,
        num_predict: req.max_tokens,
        stop: req.stop.clone(),
    };

    OllamaChatRequest {
        model: req.model.clone(),
        messages: req.messages.iter().map(OllamaMessage::from).collect(),
        stream,
        options: (!options.is_empty()).then_some(options),
    }
}

/// Translate a non-streaming backend response.
///
/// Missing counters count as zero in `total_tokens` but stay absent in the
/// individual usage fields.
pub fn to_completion_response(
    resp: OllamaChatResponse,
    id: String,
    fallback_model: &str,
) -> ChatCompletionResponse {
    let (role, content) = match resp.message {
        Some(message) => (
            message.role.parse().unwrap_or(Role::Assistant),
            message.content,
        ),
        None => (Role::Assistant, resp.response.unwrap_or_default()),
    };

    let usage = Usage {
        prompt_tokens: resp.prompt_eval_count,
        completion_tokens: resp.eval_count,
        total_tokens: resp.prompt_eval_count.unwrap_or(0) + resp.eval_count.unwrap_or(0),
    };

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage { role, content },
            finish_reason: "stop".to_string(),
        }],
        usage,
    }
}
