//! OpenAI-compatible chat completions client (OpenRouter by default)

use super::sse::{data_payload, SseBuffer};
use super::{
    ChatMessage, ChatModel, Completion, CompletionRequest, DeltaStream, StreamDelta, ToolCall,
    ToolCallDelta, ToolDefinition,
};
use crate::chat::Role;
use crate::config::ModelConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const SERVICE: &str = "model";

/// Chat completions client
#[derive(Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    timeout: Duration,
    app_title: String,
    site_url: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    annotations: Vec<UrlAnnotation>,
}

#[derive(Deserialize)]
struct UrlAnnotation {
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Deserialize)]
struct UrlCitation {
    url: String,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
    #[serde(default)]
    annotations: Vec<UrlAnnotation>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OpenRouterClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build model HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            app_title: config.app_title.clone(),
            site_url: config.site_url.clone(),
        })
    }

    fn build_body<'a>(&self, request: &'a CompletionRequest, stream: bool) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::text(Role::System, system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        ChatRequest {
            model: &request.model,
            messages,
            tools: request.tools.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.app_title);
        if let Some(site) = &self.site_url {
            builder = builder.header("HTTP-Referer", site);
        }
        builder
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::UpstreamTimeout {
                service: SERVICE.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::upstream(SERVICE, e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::upstream(
            SERVICE,
            format!("API error {}: {}", status, body),
        ))
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request, false);

        let response = self
            .post()
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Malformed response: {}", e)))?;

        Ok(into_completion(parsed))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream> {
        let body = self.build_body(request, true);

        let response = self
            .post()
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;
        let (tx, rx) = mpsc::channel::<Result<StreamDelta>>(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            let mut seen = HashSet::new();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Delta receiver dropped, abandoning upstream stream");
                        return;
                    }
                    next = bytes.next() => next,
                };
                let chunk = match next {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(AppError::upstream(SERVICE, format!("Stream read failed: {}", e))))
                            .await;
                        return;
                    }
                };
                buffer.push_chunk(&chunk);

                while let Some(block) = buffer.next_block() {
                    match forward_block(&block, &mut seen, &tx).await {
                        Forward::Continue => {}
                        Forward::Done => return,
                        Forward::Closed => {
                            debug!("Delta receiver dropped, abandoning upstream stream");
                            return;
                        }
                    }
                }
            }

            if let Some(rest) = buffer.take_remaining() {
                let _ = forward_block(&rest, &mut seen, &tx).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

enum Forward {
    Continue,
    Done,
    Closed,
}

async fn forward_block(
    block: &str,
    seen: &mut HashSet<String>,
    tx: &mpsc::Sender<Result<StreamDelta>>,
) -> Forward {
    let Some(payload) = data_payload(block) else {
        return Forward::Continue;
    };
    if payload.trim() == "[DONE]" {
        return Forward::Done;
    }

    let deltas = match serde_json::from_str::<ChunkResponse>(&payload) {
        Ok(chunk) => parse_chunk(chunk, seen),
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream chunk");
            return Forward::Continue;
        }
    };

    for delta in deltas {
        if tx.send(Ok(delta)).await.is_err() {
            return Forward::Closed;
        }
    }
    Forward::Continue
}

fn parse_chunk(chunk: ChunkResponse, seen: &mut HashSet<String>) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    for url in chunk.citations {
        if seen.insert(url.clone()) {
            deltas.push(StreamDelta::Source(url));
        }
    }

    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                deltas.push(StreamDelta::Reasoning(reasoning));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                deltas.push(StreamDelta::Text(content));
            }
            for annotation in delta.annotations {
                if let Some(citation) = annotation.url_citation {
                    if seen.insert(citation.url.clone()) {
                        deltas.push(StreamDelta::Source(citation.url));
                    }
                }
            }
            for call in delta.tool_calls {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                deltas.push(StreamDelta::ToolCall(ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }));
            }
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(StreamDelta::Finish(Some(reason)));
        }
    }

    deltas
}

fn into_completion(response: ChatResponse) -> Completion {
    let mut citations: Vec<String> = Vec::new();
    for url in response.citations {
        push_unique(&mut citations, url);
    }

    let Some(choice) = response.choices.into_iter().next() else {
        return Completion {
            citations,
            ..Default::default()
        };
    };

    for annotation in choice.message.annotations {
        if let Some(citation) = annotation.url_citation {
            push_unique(&mut citations, citation.url);
        }
    }

    Completion {
        text: choice.message.content.unwrap_or_default(),
        reasoning: choice.message.reasoning.filter(|r| !r.is_empty()),
        citations,
        tool_calls: choice.message.tool_calls,
        finish_reason: choice.finish_reason,
    }
}

fn push_unique(urls: &mut Vec<String>, url: String) {
    if !urls.contains(&url) {
        urls.push(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chunk_orders_and_dedupes() {
        let mut seen = HashSet::new();
        let chunk: ChunkResponse = serde_json::from_value(json!({
            "citations": ["https://a.example", "https://b.example"],
            "choices": [{
                "delta": {
                    "reasoning": "hmm",
                    "content": "Hi",
                    "annotations": [{"type": "url_citation", "url_citation": {"url": "https://a.example"}}]
                }
            }]
        }))
        .unwrap();

        let deltas = parse_chunk(chunk, &mut seen);
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Source("https://a.example".into()),
                StreamDelta::Source("https://b.example".into()),
                StreamDelta::Reasoning("hmm".into()),
                StreamDelta::Text("Hi".into()),
            ]
        );

        // Perplexity repeats the full citation list on every chunk
        let again: ChunkResponse = serde_json::from_value(json!({
            "citations": ["https://a.example", "https://b.example"],
            "choices": [{"delta": {"content": "!"}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert_eq!(
            parse_chunk(again, &mut seen),
            vec![
                StreamDelta::Text("!".into()),
                StreamDelta::Finish(Some("stop".into()))
            ]
        );
    }

    #[test]
    fn test_parse_tool_call_fragment() {
        let mut seen = HashSet::new();
        let chunk: ChunkResponse = serde_json::from_value(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_9", "type": "function",
                "function": {"name": "addMemory", "arguments": ""}
            }]}}]
        }))
        .unwrap();

        assert_eq!(
            parse_chunk(chunk, &mut seen),
            vec![StreamDelta::ToolCall(ToolCallDelta {
                index: 0,
                id: Some("call_9".into()),
                name: Some("addMemory".into()),
                arguments: String::new(),
            })]
        );
    }

    #[test]
    fn test_into_completion_collects_citations() {
        let response: ChatResponse = serde_json::from_value(json!({
            "citations": ["https://x.example"],
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Findings",
                    "annotations": [
                        {"type": "url_citation", "url_citation": {"url": "https://x.example"}},
                        {"type": "url_citation", "url_citation": {"url": "https://y.example"}}
                    ]
                },
                "finish_reason": "stop"
            }]
        }))
        .unwrap();

        let completion = into_completion(response);
        assert_eq!(completion.text, "Findings");
        assert_eq!(completion.citations, vec!["https://x.example", "https://y.example"]);
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_system_prompt_prepended() {
        let client = OpenRouterClient::new(&ModelConfig::default(), "k".into()).unwrap();
        let request = CompletionRequest::new("m", vec![ChatMessage::user("hi")]).with_system("sys");
        let body = serde_json::to_value(client.build_body(&request, true)).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }
}
