use parley_core::{GenerationError, RoutingError};
use parley_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Bad responder or guardrail configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl EngineError {
    /// `kind` reported to the client in an error frame.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Routing(_) => "routing_error",
            Self::Store(StoreError::Forbidden(_)) => "forbidden",
            Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Store(_) => "store_unavailable",
            Self::Generation(e) => e.error_kind(),
            Self::Config(_) => "configuration_error",
            Self::InvalidMessage(_) => "invalid_message",
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            Self::Store(StoreError::Forbidden(_)) => "That session belongs to another user.".into(),
            Self::Store(StoreError::NotFound(_)) => "Session not found.".into(),
            Self::Store(_) => "Conversation storage is unavailable. Please try again.".into(),
            Self::Generation(e) => e.client_message(),
            Self::InvalidMessage(detail) => detail.clone(),
            Self::Routing(_) | Self::Config(_) => "Something went wrong on our side.".into(),
        }
    }
}
