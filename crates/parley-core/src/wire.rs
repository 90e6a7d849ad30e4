//! JSON frames exchanged with a connected client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{ResponderId, SessionId, TurnId, UserId};
use crate::session::Session;
use crate::turn::Turn;

/// Client → server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        #[serde(default)]
        session_id: Option<SessionId>,
        user_id: UserId,
        content: String,
        /// Explicit responder choice; wins over classification when registered.
        #[serde(default)]
        responder: Option<ResponderId>,
    },
    History {
        session_id: SessionId,
        user_id: UserId,
        #[serde(default)]
        after_turn_id: Option<TurnId>,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// The caller's sessions, most recently active first.
    Sessions {
        user_id: UserId,
        #[serde(default)]
        limit: Option<u32>,
    },
    Ping,
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Session { session_id: SessionId, responder_id: ResponderId },
    Chunk { content: String },
    End { turn_id: TurnId },
    Error { kind: String, message: String },
    History { session_id: SessionId, turns: Vec<Turn>, total_turns: u64 },
    Sessions { sessions: Vec<Session>, has_more: bool },
    Pong,
}

impl ServerFrame {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { kind: kind.into(), message: message.into() }
    }

    /// `end` and `error` close an exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,
    #[error("send queue full")]
    Full,
}

/// Live connection an exchange forwards frames to.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: ServerFrame) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_without_session() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"action":"message","user_id":"u1","content":"quiz me"}"#).unwrap();
        match frame {
            ClientFrame::Message { session_id, user_id, content, responder } => {
                assert!(session_id.is_none());
                assert_eq!(user_id.as_str(), "u1");
                assert_eq!(content, "quiz me");
                assert!(responder.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parse_history_request() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"action":"history","session_id":"s1","user_id":"u1","after_turn_id":4}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::History {
                session_id: SessionId::from_raw("s1"),
                user_id: UserId::from_raw("u1"),
                after_turn_id: Some(TurnId::new(4)),
                limit: None,
            }
        );
    }

    #[test]
    fn parse_sessions_request() {
        let frame: ClientFrame = serde_json::from_str(r#"{"action":"sessions","user_id":"u1","limit":5}"#).unwrap();
        assert_eq!(frame, ClientFrame::Sessions { user_id: UserId::from_raw("u1"), limit: Some(5) });
    }

    #[test]
    fn parse_ping() {
        let frame: ClientFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn server_frame_shapes() {
        let chunk = serde_json::to_value(ServerFrame::Chunk { content: "x".into() }).unwrap();
        assert_eq!(chunk, serde_json::json!({"type": "chunk", "content": "x"}));

        let end = serde_json::to_value(ServerFrame::End { turn_id: TurnId::new(5) }).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end", "turn_id": 5}));

        let err = serde_json::to_value(ServerFrame::error("timeout", "slow")).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["kind"], "timeout");

        let pong = serde_json::to_value(ServerFrame::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));
    }

    #[test]
    fn terminal_frames() {
        assert!(ServerFrame::End { turn_id: TurnId::FIRST }.is_terminal());
        assert!(ServerFrame::error("x", "y").is_terminal());
        assert!(!ServerFrame::Chunk { content: "x".into() }.is_terminal());
    }
}
