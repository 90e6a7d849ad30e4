use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Content reached the client but could not be stored.
    PersistenceFailed,
    /// Turn-id collision that had to be resolved by reallocation.
    TurnConflict,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersistenceFailed => "persistence_failed",
            Self::TurnConflict => "turn_conflict",
        }
    }
}

/// A record on the operational channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub session_id: Option<SessionId>,
    pub detail: String,
    /// JSON of whatever is needed to replay the failed work.
    pub payload: Option<serde_json::Value>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, session_id: Option<SessionId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            session_id,
            detail: detail.into(),
            payload: None,
            raised_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Destination for alerts. Must not block for long; called from async context.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}
