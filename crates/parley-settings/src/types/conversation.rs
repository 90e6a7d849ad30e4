use serde::{Deserialize, Serialize};

/// What happens to streamed output when generation fails midway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// No responder turn is written.
    #[default]
    Discard,
    /// Whatever was generated is written as a responder turn marked with the error kind.
    PersistPartial,
}

impl std::str::FromStr for PartialPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard" => Ok(Self::Discard),
            "persist_partial" => Ok(Self::PersistPartial),
            other => Err(format!("unknown partial policy: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSettings {
    /// Prior turns handed to a responder. 0 disables history entirely.
    pub context_window: usize,
    pub partial_policy: PartialPolicy,
    /// Sessions idle this long are soft-expired.
    pub session_expiry_hours: u64,
    /// Max gap between chunks once streaming has started.
    pub chunk_idle_timeout_secs: u64,
    /// Default page size for history replay.
    pub history_limit: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            context_window: 8,
            partial_policy: PartialPolicy::Discard,
            session_expiry_hours: 72,
            chunk_idle_timeout_secs: 60,
            history_limit: 100,
        }
    }
}
