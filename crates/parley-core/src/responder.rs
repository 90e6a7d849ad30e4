use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::context::ContextWindow;
use crate::errors::GenerationError;
use crate::ids::ResponderId;

/// Final consolidated output of a responder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: BTreeMap::new() }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Items of a responder stream. Contract: `Chunk* → (Done | Error)`.
/// Anything after a terminal event is ignored by consumers.
#[derive(Clone, Debug)]
pub enum ResponderEvent {
    Chunk { text: String },
    Done { completion: Completion },
    Error { error: GenerationError },
}

impl ResponderEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Lazy, finite, non-restartable.
pub type ResponseStream = Pin<Box<dyn Stream<Item = ResponderEvent> + Send>>;

/// A specialized capability turning (context, message) into a streamed answer.
#[async_trait]
pub trait Responder: Send + Sync {
    fn id(&self) -> &ResponderId;

    async fn handle(
        &self,
        context: &ContextWindow,
        message: &str,
    ) -> Result<ResponseStream, GenerationError>;
}
