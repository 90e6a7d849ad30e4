use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ResponderId, SessionId, UserId};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Soft-expired after inactivity. Never hard-deleted; a new message reactivates it.
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Per-user conversation state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub active_responder_id: Option<ResponderId>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub title: String,
    pub summary: String,
    pub message_count: u32,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(session_id: SessionId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            active_responder_id: None,
            created_at: now,
            last_active_at: now,
            metadata: BTreeMap::new(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            summary: String::new(),
            message_count: 0,
            status: SessionStatus::Active,
        }
    }

    /// Advance `last_active_at`; never moves it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_active_at {
            self.last_active_at = at;
        }
        self.status = SessionStatus::Active;
    }

    /// Returns true if the active responder changed.
    pub fn set_active_responder(&mut self, responder_id: ResponderId) -> bool {
        if self.active_responder_id.as_ref() == Some(&responder_id) {
            return false;
        }
        self.active_responder_id = Some(responder_id);
        true
    }

    pub fn summary(&self) -> Option<&str> {
        let trimmed = self.summary.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}
