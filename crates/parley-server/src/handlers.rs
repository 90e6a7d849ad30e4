use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use parley_core::{ClientFrame, ServerFrame};
use parley_engine::{Exchange, ExchangeOutcome, StreamCoordinator};

use crate::client::{Connection, ConnectionRegistry, ConnectionSink};

/// Everything a request handler needs.
pub struct HandlerState {
    pub coordinator: Arc<StreamCoordinator>,
    pub connections: Arc<ConnectionRegistry>,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(coordinator: Arc<StreamCoordinator>, connections: Arc<ConnectionRegistry>) -> Self {
        Self { coordinator, connections, started_at: Instant::now() }
    }

    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "healthy",
            "uptimeSecs": self.started_at.elapsed().as_secs(),
            "connections": self.connections.count(),
            "responders": self.coordinator.registry().ids(),
            "defaultResponder": self.coordinator.registry().default_responder(),
        })
    }
}

/// Handle one inbound text frame from `connection`.
pub async fn dispatch(state: &HandlerState, connection: &Arc<Connection>, raw: &str) {
    let sink = ConnectionSink(Arc::clone(connection));

    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = %connection.id, error = %e, "unparseable client frame");
            let _ = connection
                .send_frame(&ServerFrame::error("invalid_frame", format!("Could not parse message: {e}")))
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Message { session_id, user_id, content, responder } => {
            let exchange = Exchange {
                connection_id: connection.id.clone(),
                session_id,
                user_id,
                content,
                responder_hint: responder,
            };
            match state.coordinator.run_exchange(exchange, &sink).await {
                Ok(outcome) => {
                    connection.set_session(outcome.session_id().clone());
                    if let ExchangeOutcome::Failed { pending, .. } = &outcome {
                        warn!(
                            session_id = %outcome.session_id(),
                            keys = ?pending.keys(),
                            "exchange left uncommitted turns"
                        );
                    }
                }
                Err(e) => debug!(connection_id = %connection.id, error = %e, "exchange rejected"),
            }
        }
        ClientFrame::History { session_id, user_id, after_turn_id, limit } => {
            let reply = match state.coordinator.history(&session_id, &user_id, after_turn_id, limit).await {
                Ok(page) => {
                    connection.set_session(session_id.clone());
                    ServerFrame::History { session_id, turns: page.turns, total_turns: page.total_turns }
                }
                Err(e) => ServerFrame::error(e.error_kind(), e.client_message()),
            };
            let _ = connection.send_frame(&reply).await;
        }
        ClientFrame::Sessions { user_id, limit } => {
            let reply = match state.coordinator.sessions_for(&user_id, limit).await {
                Ok((sessions, has_more)) => ServerFrame::Sessions { sessions, has_more },
                Err(e) => ServerFrame::error(e.error_kind(), e.client_message()),
            };
            let _ = connection.send_frame(&reply).await;
        }
        ClientFrame::Ping => {
            let _ = connection.send_frame(&ServerFrame::Pong).await;
        }
    }
}
