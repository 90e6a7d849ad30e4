use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a content-safety check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject { reason_code: String },
}

impl Verdict {
    pub fn reject(reason_code: impl Into<String>) -> Self {
        Self::Reject { reason_code: reason_code.into() }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// External accept/reject content check, consulted before generation.
#[async_trait]
pub trait Guardrail: Send + Sync {
    async fn check(&self, message: &str) -> Verdict;
}

/// Accepts everything.
pub struct AllowAll;

#[async_trait]
impl Guardrail for AllowAll {
    async fn check(&self, _message: &str) -> Verdict {
        Verdict::Accept
    }
}
