use serde::{Deserialize, Serialize};

/// Static description of one responder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponderSettings {
    pub id: String,
    pub capability_tags: Vec<String>,
    /// Words or phrases that route a message here. Matched case-insensitively on word boundaries.
    pub keywords: Vec<String>,
    /// System prompt for the persona.
    pub persona: String,
    /// Deadline for the first chunk.
    pub timeout_secs: u64,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            capability_tags: Vec::new(),
            keywords: Vec::new(),
            persona: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RespondersSettings {
    /// Handles anything no other responder claims.
    pub default_responder: String,
    /// In routing priority order.
    pub descriptors: Vec<ResponderSettings>,
}

impl RespondersSettings {
    pub fn find(&self, id: &str) -> Option<&ResponderSettings> {
        self.descriptors.iter().find(|d| d.id == id)
    }
}

fn descriptor(id: &str, tags: &[&str], keywords: &[&str], persona: &str, timeout_secs: u64) -> ResponderSettings {
    ResponderSettings {
        id: id.to_string(),
        capability_tags: tags.iter().map(|s| s.to_string()).collect(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        persona: persona.to_string(),
        timeout_secs,
    }
}

impl Default for RespondersSettings {
    fn default() -> Self {
        Self {
            default_responder: "general".to_string(),
            descriptors: vec![
                descriptor(
                    "curriculum",
                    &["curriculum", "planning"],
                    &["curriculum", "learning path", "lesson plan", "plan my lessons", "syllabus"],
                    "You are a seasoned school principal who knows the curriculum well. \
                     Help the learner plan what to study and in which order. Be precise and encouraging.",
                    30,
                ),
                descriptor(
                    "quizzer",
                    &["assessment", "practice"],
                    &["quiz", "quiz me", "practice questions", "test my knowledge", "flashcards"],
                    "You are a competitive but friendly classmate who writes practice questions. \
                     Ask one question at a time and explain the answer after the learner replies.",
                    30,
                ),
                descriptor(
                    "reviewer",
                    &["review", "summary"],
                    &["summarize", "summary", "review notes", "reviewer", "review pdf"],
                    "You are a senior high school teacher writing concise study reviewers. \
                     Summarize material into key points, definitions and examples.",
                    60,
                ),
                descriptor(
                    "general",
                    &["general"],
                    &[],
                    "You are a friendly and enthusiastic tutor. Answer clearly and keep explanations \
                     at the learner's level.",
                    30,
                ),
            ],
        }
    }
}
