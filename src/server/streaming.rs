//! SSE (Server-Sent Events) streaming for token-by-token responses.
//!
//! Converts Ollama's newline-delimited JSON stream into an SSE stream
//! compatible with the OpenAI streaming format. Whatever happens upstream,
//! the stream ends with a `finish_reason: "stop"` chunk and `data: [DONE]`.

use std::pin::Pin;

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::types::OllamaStreamLine;
use crate::error::{BackendError, ErrorEnvelope, GatewayError};
use crate::server::unix_now;

/// Streaming chat completion chunk (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One SSE record emitted to the client.
#[derive(Debug, Clone)]
pub enum SseFrame {
    Chunk(ChatCompletionChunk),
    Error(ErrorEnvelope),
    Done,
}

impl SseFrame {
    /// Payload of the `data:` field.
    pub fn data(&self) -> String {
        match self {
            SseFrame::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            SseFrame::Error(err) => serde_json::to_string(err).unwrap_or_default(),
            SseFrame::Done => "[DONE]".to_string(),
        }
    }

    /// Wire form, `data: <payload>\n\n`.
    #[cfg(test)]
    fn to_wire(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.data())
    }
}

/// Identity shared by every chunk of one stream.
struct ChunkContext {
    id: String,
    model: String,
    created: u64,
    sent_role: bool,
}

impl ChunkContext {
    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    fn content(&mut self, text: String) -> ChatCompletionChunk {
        // First chunk includes the role.
        let role = (!self.sent_role).then(|| "assistant".to_string());
        self.sent_role = true;
        self.chunk(
            ChunkDelta {
                role,
                content: Some(text),
            },
            None,
        )
    }

    fn stop(&self) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some("stop"))
    }
}

enum LineOutcome {
    Skip,
    Delta(String),
    Finished,
    Failed(String),
}

fn classify_line(line: &str) -> LineOutcome {
    if line.trim().is_empty() {
        return LineOutcome::Skip;
    }

    let parsed: OllamaStreamLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Dropping malformed backend line");
            return LineOutcome::Skip;
        }
    };

    if let Some(message) = parsed.error {
        return LineOutcome::Failed(message);
    }

    match parsed.done {
        Some(false) => LineOutcome::Delta(parsed.content()),
        Some(true) => LineOutcome::Finished,
        None => LineOutcome::Skip,
    }
}

enum Phase {
    Reading,
    Stop,
    Sentinel,
    Finished,
}

struct TranslatorState<S> {
    // Dropped as soon as reading stops, which closes the backend connection.
    lines: Option<Pin<Box<S>>>,
    phase: Phase,
    ctx: ChunkContext,
}

/// Translate backend lines into SSE frames.
///
/// Malformed or empty lines are dropped. A `done: true` line or the end of
/// input stops reading. A read failure yields one in-band error frame. In
/// every case the last two frames are the stop chunk and [`SseFrame::Done`].
pub fn translate_stream<S>(
    lines: S,
    completion_id: String,
    model: String,
) -> impl Stream<Item = SseFrame>
where
    S: Stream<Item = Result<String, BackendError>>,
{
    let state = TranslatorState {
        lines: Some(Box::pin(lines)),
        phase: Phase::Reading,
        ctx: ChunkContext {
            id: completion_id,
            model,
            created: unix_now(),
            sent_role: false,
        },
    };

    stream::unfold(state, |mut st| async move {
        loop {
            match st.phase {
                Phase::Reading => {
                    let next = match st.lines.as_mut() {
                        Some(lines) => lines.next().await,
                        None => None,
                    };
                    match next {
                        None => st.finish_reading(),
                        Some(Ok(line)) => match classify_line(&line) {
                            LineOutcome::Skip => continue,
                            LineOutcome::Delta(text) => {
                                let chunk = st.ctx.content(text);
                                return Some((SseFrame::Chunk(chunk), st));
                            }
                            LineOutcome::Finished => st.finish_reading(),
                            LineOutcome::Failed(message) => {
                                warn!(id = %st.ctx.id, error = %message, "Backend reported an error mid-stream");
                                st.finish_reading();
                                let err = GatewayError::Internal(message);
                                return Some((SseFrame::Error(err.stream_error_body()), st));
                            }
                        },
                        Some(Err(e)) => {
                            warn!(id = %st.ctx.id, error = %e, "Backend stream failed");
                            st.finish_reading();
                            let err = GatewayError::from(e);
                            return Some((SseFrame::Error(err.stream_error_body()), st));
                        }
                    }
                }
                Phase::Stop => {
                    st.phase = Phase::Sentinel;
                    let chunk = st.ctx.stop();
                    return Some((SseFrame::Chunk(chunk), st));
                }
                Phase::Sentinel => {
                    st.phase = Phase::Finished;
                    return Some((SseFrame::Done, st));
                }
                Phase::Finished => return None,
            }
        }
    })
}

impl<S> TranslatorState<S> {
    fn finish_reading(&mut self) {
        self.lines = None;
        self.phase = Phase::Stop;
    }
}
