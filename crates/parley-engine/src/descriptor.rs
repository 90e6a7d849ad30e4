use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;

use parley_core::ResponderId;
use parley_settings::ResponderSettings;

use crate::error::EngineError;

/// Static routing description of one responder, compiled once at startup.
#[derive(Clone, Debug)]
pub struct ResponderDescriptor {
    pub id: ResponderId,
    pub capability_tags: BTreeSet<String>,
    pub keywords: Vec<String>,
    pub persona: String,
    /// Deadline for the first chunk.
    pub timeout: Duration,
    matcher: Option<Regex>,
}

impl ResponderDescriptor {
    pub fn new(id: impl Into<ResponderId>, keywords: &[&str]) -> Result<Self, EngineError> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        Ok(Self {
            id: id.into(),
            capability_tags: BTreeSet::new(),
            matcher: keyword_matcher(&keywords)?,
            keywords,
            persona: String::new(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn from_settings(settings: &ResponderSettings) -> Result<Self, EngineError> {
        Ok(Self {
            id: ResponderId::from_raw(settings.id.clone()),
            capability_tags: settings.capability_tags.iter().cloned().collect(),
            matcher: keyword_matcher(&settings.keywords)?,
            keywords: settings.keywords.clone(),
            persona: settings.persona.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True if any keyword occurs in `message` as a whole word or phrase, ignoring case.
    pub fn matches(&self, message: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(message))
    }
}

/// `(?i)\b(?:kw1|kw2)\b`, with runs of whitespace inside a phrase matching any whitespace.
fn keyword_matcher(keywords: &[String]) -> Result<Option<Regex>, EngineError> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            k.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| EngineError::Config(format!("keyword pattern: {e}")))
}
