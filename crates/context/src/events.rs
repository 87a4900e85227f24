//! Outbound frames and the per-turn emitter
//!
//! The emitter is the only writer of the outbound channel. Everything it
//! sends is also recorded, in send order, so the persisted assistant
//! message matches what the caller saw.

use flowllm_common::chat::{Annotation, MessagePart, SourceRef};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One frame of the response stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    Source {
        source: SourceRef,
    },
    Annotation {
        annotation: Annotation,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        message_id: String,
        finish_reason: String,
    },
}

impl OutboundEvent {
    /// Frame kind, used as the SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::Source { .. } => "source",
            Self::Annotation { .. } => "annotation",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

/// Side-channel data accumulated for the assistant message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnRecord {
    pub content: String,
    pub parts: Vec<MessagePart>,
    pub annotations: Vec<Annotation>,
}

impl TurnRecord {
    fn push_text(&mut self, delta: &str) {
        self.content.push_str(delta);
        match self.parts.last_mut() {
            Some(MessagePart::Text { text }) => text.push_str(delta),
            _ => self.parts.push(MessagePart::Text {
                text: delta.to_string(),
            }),
        }
    }

    fn push_reasoning(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(MessagePart::Reasoning { reasoning }) => reasoning.push_str(delta),
            _ => self.parts.push(MessagePart::Reasoning {
                reasoning: delta.to_string(),
            }),
        }
    }
}

/// Writes frames for one turn and records them
pub struct TurnEmitter {
    sink: Option<mpsc::Sender<OutboundEvent>>,
    cancel: CancellationToken,
    record: TurnRecord,
}

impl TurnEmitter {
    pub fn new(sink: mpsc::Sender<OutboundEvent>, cancel: CancellationToken) -> Self {
        Self {
            sink: Some(sink),
            cancel,
            record: TurnRecord::default(),
        }
    }

    /// Send a frame. A gone receiver means the caller left: the turn is cancelled.
    async fn send(&mut self, event: OutboundEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        if sink.send(event).await.is_err() {
            debug!("Outbound receiver dropped, cancelling turn");
            self.sink = None;
            self.cancel.cancel();
        }
    }

    pub async fn annotate(&mut self, annotation: Annotation) {
        self.record.annotations.push(annotation.clone());
        self.send(OutboundEvent::Annotation { annotation }).await;
    }

    pub async fn source(&mut self, source: SourceRef) {
        self.record.parts.push(MessagePart::Source {
            source: source.clone(),
        });
        self.send(OutboundEvent::Source { source }).await;
    }

    pub async fn text(&mut self, delta: String) {
        self.record.push_text(&delta);
        self.send(OutboundEvent::TextDelta { text: delta }).await;
    }

    pub async fn reasoning(&mut self, delta: String) {
        self.record.push_reasoning(&delta);
        self.send(OutboundEvent::ReasoningDelta { text: delta }).await;
    }

    pub async fn tool_call(&mut self, id: &str, name: &str, args: serde_json::Value) {
        self.record.parts.push(MessagePart::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            args: args.clone(),
        });
        self.send(OutboundEvent::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            args,
        })
        .await;
    }

    pub async fn tool_result(&mut self, id: &str, name: &str, result: serde_json::Value) {
        self.record.parts.push(MessagePart::ToolResult {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            result: result.clone(),
        });
        self.send(OutboundEvent::ToolResult {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            result,
        })
        .await;
    }

    /// Error frames are never persisted
    pub async fn error(&mut self, message: &str) {
        self.send(OutboundEvent::Error {
            message: message.to_string(),
        })
        .await;
    }

    pub async fn done(&mut self, message_id: &str, finish_reason: &str) {
        self.send(OutboundEvent::Done {
            message_id: message_id.to_string(),
            finish_reason: finish_reason.to_string(),
        })
        .await;
    }

    pub fn record(&self) -> &TurnRecord {
        &self.record
    }

    /// Close the outbound channel and hand back what was recorded
    pub fn close(mut self) -> TurnRecord {
        self.sink = None;
        std::mem::take(&mut self.record)
    }
}
