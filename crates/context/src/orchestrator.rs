//! Turn orchestration
//!
//! One call to [`Pipeline::run`] drives a whole turn:
//! - enabled stages run sequentially in fixed order, each under a timeout
//! - the enriched prompt is streamed from the answer model
//! - at most one `addMemory` call per step is executed, for a bounded number of steps
//! - the finished (or stopped) turn is persisted once, after the stream is closed

use crate::assembly::assemble;
use crate::events::{OutboundEvent, TurnEmitter};
use crate::persister::Persister;
use crate::prompts;
use crate::stages::{Stage, StageContext, StageResults, StageServices};
use chrono::Utc;
use flowllm_common::chat::{Annotation, Capabilities, Role, SourceRef, StoredMessage};
use flowllm_common::config::PipelineConfig;
use flowllm_common::errors::{AppError, Result, GENERIC_ERROR_MESSAGE};
use flowllm_common::llm::{
    ChatMessage, CompletionRequest, StreamDelta, ToolCall, ToolCallAccumulator, ToolDefinition,
};
use flowllm_common::metrics;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Name of the memory write-back tool
pub const ADD_MEMORY_TOOL: &str = "addMemory";

fn add_memory_tool() -> ToolDefinition {
    ToolDefinition::function(
        ADD_MEMORY_TOOL,
        prompts::ADD_MEMORY_TOOL,
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The fact about the user to remember"
                }
            },
            "required": ["content"]
        }),
    )
}

/// Runtime limits for a turn
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_tool_steps: usize,
    pub turn_deadline: Duration,
    pub stage_timeout: Duration,
    pub memory_write_back: bool,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_tool_steps: config.max_tool_steps,
            turn_deadline: config.turn_deadline(),
            stage_timeout: config.stage_timeout(),
            memory_write_back: config.memory_write_back,
        }
    }
}

/// One inbound turn. `caller_id` always comes from the auth gate.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Id of the assistant message this turn produces
    pub turn_id: String,
    pub conversation_id: String,
    pub caller_id: String,
    /// Full conversation as sent by the client, ending with the new user message
    pub messages: Vec<StoredMessage>,
    pub capabilities: Capabilities,
    pub model: String,
}

impl Turn {
    pub fn new(
        conversation_id: impl Into<String>,
        caller_id: impl Into<String>,
        messages: Vec<StoredMessage>,
        capabilities: Capabilities,
        model: impl Into<String>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            caller_id: caller_id.into(),
            messages,
            capabilities,
            model: model.into(),
        }
    }

    /// The new user message
    pub fn user_message(&self) -> Option<&StoredMessage> {
        self.messages.last().filter(|m| m.role == Role::User)
    }

    pub fn input_text(&self) -> String {
        self.user_message().map(StoredMessage::text).unwrap_or_default()
    }

    /// Reject a turn before anything runs
    pub fn validate(&self) -> Result<()> {
        if self.conversation_id.trim().is_empty() {
            return Err(AppError::Validation {
                message: "conversationId is required".to_string(),
                field: Some("conversationId".to_string()),
            });
        }
        if self.model.trim().is_empty() {
            return Err(AppError::Validation {
                message: "model is required".to_string(),
                field: Some("model".to_string()),
            });
        }
        if self.user_message().is_none() {
            return Err(AppError::Validation {
                message: "the last message must come from the user".to_string(),
                field: Some("messages".to_string()),
            });
        }
        if self.input_text().trim().is_empty() {
            return Err(AppError::EmptyInput);
        }
        Ok(())
    }
}

/// How generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishState {
    Completed,
    Stopped,
    Deadline,
    Failed,
}

impl FinishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "stop",
            Self::Stopped => "stopped",
            Self::Deadline => "deadline",
            Self::Failed => "error",
        }
    }
}

/// Result of a turn that produced something worth keeping
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub conversation_id: String,
    pub user_message: StoredMessage,
    pub assistant_message: StoredMessage,
    pub finish: FinishState,
    pub persisted: bool,
}

/// The per-turn enrichment and streaming pipeline
#[derive(Clone)]
pub struct Pipeline {
    services: Arc<StageServices>,
    persister: Persister,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(services: Arc<StageServices>, persister: Persister, settings: PipelineSettings) -> Self {
        Self {
            services,
            persister,
            settings,
        }
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    /// Run a turn, writing frames to `sink`. Cancelling `cancel` (or dropping
    /// the receiver) stops generation; whatever was produced is still persisted.
    #[instrument(skip_all, fields(turn_id = %turn.turn_id, conversation_id = %turn.conversation_id))]
    pub async fn run(
        &self,
        turn: Turn,
        sink: mpsc::Sender<OutboundEvent>,
        cancel: CancellationToken,
    ) -> Result<CompletedTurn> {
        turn.validate()?;
        let user_message = turn.user_message().cloned().ok_or(AppError::EmptyInput)?;
        let raw_query = user_message.text();
        let mut emitter = TurnEmitter::new(sink, cancel.clone());

        let results = self.enrich(&turn, &raw_query, &mut emitter, &cancel).await;
        let messages = assemble(&turn.messages, &results, self.services.storage.as_ref());

        let started = Instant::now();
        let generation = self.generate(&turn, messages, &mut emitter, &cancel).await;
        let (finish, failure) = match generation {
            Ok(finish) => (finish, None),
            Err(e) => {
                error!(error = %e, "Generation failed");
                (FinishState::Failed, Some(e))
            }
        };
        metrics::record_generation(finish.as_str(), started.elapsed().as_secs_f64());

        if finish == FinishState::Failed {
            emitter.error(GENERIC_ERROR_MESSAGE).await;
        }
        emitter.done(&turn.turn_id, finish.as_str()).await;
        let record = emitter.close();

        let assistant_message = StoredMessage {
            id: turn.turn_id.clone(),
            role: Role::Assistant,
            content: record.content,
            parts: record.parts,
            annotations: record.annotations,
            created_at: Utc::now(),
        };

        if let Some(e) = failure {
            if assistant_message.content.is_empty() {
                return Err(AppError::GenerationFailed {
                    message: e.to_string(),
                });
            }
        }

        let persisted = self
            .persister
            .persist(
                &turn.conversation_id,
                &turn.caller_id,
                &user_message,
                &assistant_message,
            )
            .await
            .is_ok();

        info!(finish = finish.as_str(), persisted, "Turn finished");
        Ok(CompletedTurn {
            conversation_id: turn.conversation_id,
            user_message,
            assistant_message,
            finish,
            persisted,
        })
    }

    /// Run enabled stages in order. Failures only cost that stage's contribution.
    async fn enrich(
        &self,
        turn: &Turn,
        raw_query: &str,
        emitter: &mut TurnEmitter,
        cancel: &CancellationToken,
    ) -> StageResults {
        let mut results = StageResults::default();

        for stage in Stage::enabled(&turn.capabilities) {
            if cancel.is_cancelled() {
                break;
            }
            emitter.annotate(Annotation::info(stage.progress())).await;

            let effective_query = results.effective_query(raw_query).to_string();
            let started = Instant::now();
            let mut ctx = StageContext {
                caller_id: &turn.caller_id,
                history: &turn.messages,
                effective_query: &effective_query,
                rag_rerank: turn.capabilities.rag_rerank,
                services: &self.services,
                emitter: &mut *emitter,
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = timeout(self.settings.stage_timeout, stage.run(&mut ctx)) => outcome,
            };
            let elapsed = started.elapsed().as_secs_f64();

            let failure = match outcome {
                Ok(Ok(result)) => {
                    let label = if result.is_empty() { "empty" } else { "ok" };
                    metrics::record_stage(stage.name(), label, elapsed);
                    debug!(stage = stage.name(), outcome = label, "Stage finished");
                    for annotation in result.annotations() {
                        emitter.annotate(annotation).await;
                    }
                    results.record(result);
                    continue;
                }
                Ok(Err(e)) => {
                    metrics::record_stage(stage.name(), "degraded", elapsed);
                    e.to_string()
                }
                Err(_) => {
                    metrics::record_stage(stage.name(), "timeout", elapsed);
                    format!("timed out after {}ms", self.settings.stage_timeout.as_millis())
                }
            };

            let degraded = AppError::StageDegraded {
                stage: stage.name().to_string(),
                message: failure,
            };
            warn!(error = %degraded, "Stage skipped");
            if let Some(message) = stage.skipped() {
                emitter.annotate(Annotation::info(message)).await;
            }
        }

        results
    }

    /// Stream the answer, running the tool loop
    async fn generate(
        &self,
        turn: &Turn,
        mut messages: Vec<ChatMessage>,
        emitter: &mut TurnEmitter,
        cancel: &CancellationToken,
    ) -> Result<FinishState> {
        let deadline = tokio::time::Instant::now() + self.settings.turn_deadline;
        let offer_tools = turn.capabilities.memory && self.settings.memory_write_back;
        let max_steps = self.settings.max_tool_steps.max(1);

        for step in 1..=max_steps {
            let mut request =
                CompletionRequest::new(&turn.model, messages.clone()).with_system(prompts::SYSTEM);
            if offer_tools && step < max_steps {
                request = request.with_tools(vec![add_memory_tool()]);
            }

            let mut stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FinishState::Stopped),
                _ = sleep_until(deadline) => return Ok(FinishState::Deadline),
                stream = self.services.model.stream(&request) => stream?,
            };

            let mut calls = ToolCallAccumulator::default();
            let mut step_text = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(FinishState::Stopped),
                    _ = sleep_until(deadline) => {
                        warn!("Turn deadline reached");
                        return Ok(FinishState::Deadline);
                    }
                    next = stream.next() => next,
                };
                match next {
                    None | Some(Ok(StreamDelta::Finish(_))) => break,
                    Some(Err(e)) => return Err(e),
                    Some(Ok(StreamDelta::Text(text))) => {
                        step_text.push_str(&text);
                        emitter.text(text).await;
                    }
                    Some(Ok(StreamDelta::Reasoning(text))) => emitter.reasoning(text).await,
                    Some(Ok(StreamDelta::Source(url))) => emitter.source(SourceRef::new(url)).await,
                    Some(Ok(StreamDelta::ToolCall(delta))) => calls.push(delta),
                }
            }

            let mut requested = calls.finish().into_iter();
            let Some(call) = requested.next() else {
                return Ok(FinishState::Completed);
            };
            if request.tools.is_empty() {
                debug!(tool = %call.function.name, "Tool call on a step without tools ignored");
                metrics::record_tool_call(&call.function.name, false);
                for ignored in requested {
                    metrics::record_tool_call(&ignored.function.name, false);
                }
                return Ok(FinishState::Completed);
            }
            for ignored in requested {
                debug!(tool = %ignored.function.name, "Extra tool call in step ignored");
                metrics::record_tool_call(&ignored.function.name, false);
            }

            let call = with_call_id(call);
            let result = self.execute_tool(turn, &call, emitter).await;
            messages.push(ChatMessage::assistant_tool_call(step_text, call.clone()));
            messages.push(ChatMessage::tool_result(call.id, result));
        }

        Ok(FinishState::Completed)
    }

    /// Execute one tool call on behalf of the authenticated caller
    async fn execute_tool(&self, turn: &Turn, call: &ToolCall, emitter: &mut TurnEmitter) -> String {
        let name = call.function.name.as_str();
        let args: Value =
            serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
        emitter.tool_call(&call.id, name, args.clone()).await;

        let content = args
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let (result, executed) = match (name, content) {
            (ADD_MEMORY_TOOL, Some(content)) => {
                let write = timeout(
                    self.settings.stage_timeout,
                    self.services.memory.add_fact(&turn.caller_id, content),
                )
                .await;
                match write {
                    Ok(Ok(())) => (prompts::MEMORY_ADDED.to_string(), true),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Memory write failed");
                        ("Failed to add memory".to_string(), true)
                    }
                    Err(_) => {
                        warn!("Memory write timed out");
                        ("Failed to add memory".to_string(), true)
                    }
                }
            }
            (ADD_MEMORY_TOOL, None) => ("No memory content provided".to_string(), false),
            (other, _) => (format!("Unknown tool: {}", other), false),
        };
        metrics::record_tool_call(name, executed);

        emitter
            .tool_result(&call.id, name, Value::String(result.clone()))
            .await;
        result
    }
}

fn with_call_id(mut call: ToolCall) -> ToolCall {
    if call.id.is_empty() {
        call.id = format!("call_{}", Uuid::new_v4().simple());
    }
    call
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(text: &str) -> Turn {
        Turn::new(
            "c1",
            "alice",
            vec![StoredMessage::user(text)],
            Capabilities::default(),
            "openai/gpt-4.1",
        )
    }

    #[test]
    fn test_validate_rejects_empty_input() {
        assert!(matches!(turn("   ").validate(), Err(AppError::EmptyInput)));
        assert!(turn("Hello").validate().is_ok());
    }

    #[test]
    fn test_validate_requires_trailing_user_message() {
        let mut t = turn("Hello");
        t.messages.push(StoredMessage {
            role: Role::Assistant,
            ..StoredMessage::user("hi")
        });
        assert!(matches!(t.validate(), Err(AppError::Validation { .. })));

        let mut t = turn("Hello");
        t.model.clear();
        assert!(matches!(t.validate(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = PipelineSettings::from(&PipelineConfig::default());
        assert_eq!(settings.max_tool_steps, 2);
        assert_eq!(settings.turn_deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_call_id_is_generated() {
        let call = with_call_id(ToolCall {
            id: String::new(),
            kind: "function".into(),
            function: flowllm_common::llm::FunctionCall {
                name: ADD_MEMORY_TOOL.into(),
                arguments: "{}".into(),
            },
        });
        assert!(call.id.starts_with("call_"));
    }
}
