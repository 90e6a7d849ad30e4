use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ResponderId, SessionId, TurnId};

/// Who authored a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "responder" => Ok(Self::Responder),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One committed message of a conversation. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub role: Role,
    pub responder_id: Option<ResponderId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Set only on a responder turn persisted after a generation failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl Turn {
    pub fn user(session_id: SessionId, turn_id: TurnId, content: impl Into<String>) -> Self {
        Self {
            session_id,
            turn_id,
            role: Role::User,
            responder_id: None,
            content: content.into(),
            created_at: Utc::now(),
            error_kind: None,
        }
    }

    pub fn responder(
        session_id: SessionId,
        turn_id: TurnId,
        responder_id: ResponderId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            turn_id,
            role: Role::Responder,
            responder_id: Some(responder_id),
            content: content.into(),
            created_at: Utc::now(),
            error_kind: None,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Same logical write as `other`, ignoring timestamps. Used to recognize retries.
    pub fn same_payload(&self, other: &Turn) -> bool {
        self.session_id == other.session_id
            && self.turn_id == other.turn_id
            && self.role == other.role
            && self.responder_id == other.responder_id
            && self.content == other.content
            && self.error_kind == other.error_kind
    }
}
