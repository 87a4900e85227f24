//! Chat data model shared by the pipeline, the store and the HTTP surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A cited source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub url: String,
}

impl SourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
        }
    }
}

/// Typed fragment of a stored message, kept in stream order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        reasoning: String,
    },
    Source {
        source: SourceRef,
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
}

/// Annotation kinds, in the order the stages that produce them run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationKind {
    Info,
    QueryRewrite,
    Reasoning,
    Memory,
    RagContext,
    WebSearch,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::QueryRewrite => "query-rewrite",
            Self::Reasoning => "reasoning",
            Self::Memory => "memory",
            Self::RagContext => "rag-context",
            Self::WebSearch => "web-search",
        }
    }
}

/// Out-of-band progress or result attached to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub value: serde_json::Value,
}

impl Annotation {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: AnnotationKind::Info,
            value: serde_json::Value::String(text.into()),
        }
    }

    pub fn new(kind: AnnotationKind, value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// A message as received from the client and as persisted in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: new_message_id(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: content.clone(),
            }],
            content,
            annotations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Text of the message. Falls back to the concatenated text parts.
    pub fn text(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Enrichment stages the caller switched on for a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub query_rewrite: bool,
    #[serde(alias = "chainOfThought")]
    pub reasoning: bool,
    pub memory: bool,
    #[serde(alias = "rag")]
    pub rag_retrieval: bool,
    #[serde(alias = "chunkReranking")]
    pub rag_rerank: bool,
    pub web_search: bool,
}

impl Capabilities {
    pub fn any_stage(&self) -> bool {
        self.query_rewrite || self.reasoning || self.memory || self.rag_retrieval || self.web_search
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_aliases() {
        let caps: Capabilities = serde_json::from_value(json!({
            "chainOfThought": true,
            "rag": true,
            "chunkReranking": true,
            "critique": true
        }))
        .unwrap();

        assert!(caps.reasoning);
        assert!(caps.rag_retrieval);
        assert!(caps.rag_rerank);
        assert!(!caps.memory);
        assert!(caps.any_stage());
    }

    #[test]
    fn test_rerank_alone_runs_no_stage() {
        let caps = Capabilities {
            rag_rerank: true,
            ..Default::default()
        };
        assert!(!caps.any_stage());
    }

    #[test]
    fn test_part_wire_shape() {
        let part = MessagePart::ToolCall {
            tool_call_id: "call_1".into(),
            tool_name: "addMemory".into(),
            args: json!({"memory": "likes tea"}),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["toolName"], "addMemory");

        let annotation = Annotation::new(AnnotationKind::RagContext, "chunks");
        let value = serde_json::to_value(&annotation).unwrap();
        assert_eq!(value, json!({"type": "rag-context", "value": "chunks"}));
    }

    #[test]
    fn test_inbound_message_defaults() {
        let msg: StoredMessage =
            serde_json::from_value(json!({"role": "user", "content": "Hello"})).unwrap();
        assert!(!msg.id.is_empty());
        assert!(msg.parts.is_empty());
        assert_eq!(msg.text(), "Hello");
    }

    #[test]
    fn test_text_falls_back_to_parts() {
        let msg: StoredMessage = serde_json::from_value(json!({
            "role": "user",
            "parts": [{"type": "text", "text": "Hel"}, {"type": "text", "text": "lo"}]
        }))
        .unwrap();
        assert_eq!(msg.text(), "Hello");
    }
}
