use std::time::Duration;

use crate::ids::ResponderId;

/// Failure of a responder or of the generator behind it.
/// Always distinguishable from a clean end of the chunk stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("guardrail rejected message: {reason_code}")]
    GuardrailRejected { reason_code: String },

    #[error("no output within {0:?}")]
    Timeout(Duration),

    // Retryable upstream failures
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Worth another attempt, provided nothing has been streamed yet.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Upstream { .. }
                | Self::Network(_)
                | Self::StreamInterrupted(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string, used as the `kind` of client error frames.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::GuardrailRejected { .. } => "guardrail_rejected",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream_error",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Provider(_) => "provider_error",
        }
    }

    /// Message safe to show to the learner. Upstream bodies stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::GuardrailRejected { .. } => {
                "That message can't be answered here. Let's try a different question.".into()
            }
            Self::Timeout(_) => "The tutor took too long to respond. Please try again.".into(),
            Self::RateLimited { .. } => "The tutor is busy right now. Please try again shortly.".into(),
            _ => "Something went wrong while generating a response.".into(),
        }
    }

    /// Classify an HTTP status code from the generation backend.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Upstream { status, body },
            _ => Self::Provider(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Errors raised while choosing a responder.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no responder accepts this message")]
    NoMatchingResponder,

    #[error("unknown responder: {0}")]
    UnknownResponder(ResponderId),
}
