use serde::{Deserialize, Serialize};

use crate::generate::ChatMessage;
use crate::ids::SessionId;
use crate::turn::{Role, Turn};

/// Bounded recent-history slice handed to a responder. Oldest turn first.
/// Derived on demand, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub session_id: Option<SessionId>,
    pub turns: Vec<Turn>,
    pub summary: Option<String>,
}

impl ContextWindow {
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            turns: Vec::new(),
            summary: None,
        }
    }

    pub fn new(session_id: SessionId, turns: Vec<Turn>) -> Self {
        Self {
            session_id: Some(session_id),
            turns,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: Option<&str>) -> Self {
        self.summary = summary.map(str::to_owned);
        self
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Conversation history in generator form, summary first.
    /// Partial responder turns are skipped so failed answers don't seed the next one.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        if let Some(summary) = &self.summary {
            messages.push(ChatMessage::system(format!(
                "Summary of the conversation so far: {summary}"
            )));
        }
        for turn in &self.turns {
            if turn.is_partial() {
                continue;
            }
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content.clone()),
                Role::Responder => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::ChatRole;
    use crate::ids::TurnId;

    fn turns(sid: &SessionId) -> Vec<Turn> {
        vec![
            Turn::user(sid.clone(), TurnId::new(1), "what is a fraction?"),
            Turn::responder(sid.clone(), TurnId::new(2), "general".into(), "part of a whole"),
        ]
    }

    #[test]
    fn empty_window() {
        let w = ContextWindow::empty(SessionId::new());
        assert!(w.is_empty());
        assert!(w.to_messages().is_empty());
    }

    #[test]
    fn messages_follow_turn_order() {
        let sid = SessionId::new();
        let w = ContextWindow::new(sid.clone(), turns(&sid));
        let msgs = w.to_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, ChatRole::User);
        assert_eq!(msgs[1].role, ChatRole::Assistant);
        assert_eq!(msgs[1].content, "part of a whole");
    }

    #[test]
    fn summary_comes_first() {
        let sid = SessionId::new();
        let w = ContextWindow::new(sid.clone(), turns(&sid)).with_summary(Some("fractions, grade 4"));
        let msgs = w.to_messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, ChatRole::System);
        assert!(msgs[0].content.contains("fractions, grade 4"));
    }

    #[test]
    fn partial_turns_are_left_out() {
        let sid = SessionId::new();
        let mut partial = Turn::responder(sid.clone(), TurnId::new(3), "quizzer".into(), "Question 1:");
        partial.error_kind = Some("timeout".into());
        let mut all = turns(&sid);
        all.push(partial);
        let w = ContextWindow::new(sid, all);
        assert_eq!(w.len(), 3);
        assert_eq!(w.to_messages().len(), 2);
    }
}
