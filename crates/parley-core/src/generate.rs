use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Everything a generator needs for one completion.
#[derive(Clone, Debug, Default)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl GenerationRequest {
    /// Messages in wire order, with the system prompt (if any) in front.
    pub fn full_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            out.push(ChatMessage::system(prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

/// Events from a generator. Contract: `Delta* → (Done | Error)`.
#[derive(Clone, Debug)]
pub enum GenerateEvent {
    Delta { text: String },
    Done { text: String, finish_reason: Option<String> },
    Error { error: GenerationError },
}

impl GenerateEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

pub type GenerateStream = Pin<Box<dyn Stream<Item = GenerateEvent> + Send>>;

/// The opaque language-model capability responders wrap.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateStream, GenerationError>;
}
