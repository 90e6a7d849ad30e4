use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use parley_core::{Guardrail, Verdict};
use parley_settings::GuardrailSettings;

use crate::error::EngineError;

/// Rejects over-long messages and messages containing a blocked term.
pub struct KeywordGuardrail {
    blocked: Option<Regex>,
    max_chars: usize,
}

impl KeywordGuardrail {
    pub fn new(blocked_terms: &[String], max_chars: usize) -> Result<Self, EngineError> {
        let alternatives: Vec<String> = blocked_terms
            .iter()
            .map(|t| t.split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
            .filter(|t| !t.is_empty())
            .collect();
        let blocked = if alternatives.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| EngineError::Config(format!("blocked terms: {e}")))?)
        };
        Ok(Self { blocked, max_chars })
    }

    pub fn from_settings(settings: &GuardrailSettings) -> Result<Self, EngineError> {
        Self::new(&settings.blocked_terms, settings.max_message_chars)
    }
}

#[async_trait]
impl Guardrail for KeywordGuardrail {
    async fn check(&self, message: &str) -> Verdict {
        if self.max_chars > 0 && message.chars().count() > self.max_chars {
            return Verdict::reject("message_too_long");
        }
        if let Some(m) = self.blocked.as_ref().and_then(|re| re.find(message)) {
            debug!(term = m.as_str(), "guardrail matched blocked term");
            return Verdict::reject("blocked_term");
        }
        Verdict::Accept
    }
}
