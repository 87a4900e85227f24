use super::{ChatModel, Completion, CompletionRequest, DeltaStream, StreamDelta};
use crate::chat::Role;
use crate::errors::Result;
use async_trait::async_trait;
use futures::StreamExt;

/// Model that answers with the last user message (for development without an API key)
#[derive(Debug, Clone, Default)]
pub struct EchoModel;

impl EchoModel {
    fn answer(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text_content())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        Ok(Completion {
            text: Self::answer(request),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream> {
        let mut deltas: Vec<Result<StreamDelta>> = Self::answer(request)
            .split_inclusive(' ')
            .map(|word| Ok(StreamDelta::Text(word.to_string())))
            .collect();
        deltas.push(Ok(StreamDelta::Finish(Some("stop".to_string()))));

        Ok(futures::stream::iter(deltas).boxed())
    }
}
