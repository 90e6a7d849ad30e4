use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use parley_core::{ConnectionId, FrameSink, ServerFrame, SessionId, SinkError};

/// One live WebSocket.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    session_id: Mutex<Option<SessionId>>,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            session_id: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Most recent session this connection talked in.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    pub fn set_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Queue a frame, waiting for room in the send queue.
    pub async fn send_frame(&self, frame: &ServerFrame) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Closed);
        }
        let json = serde_json::to_string(frame).map_err(|e| {
            warn!(connection_id = %self.id, error = %e, "could not serialize frame");
            SinkError::Closed
        })?;
        self.tx.send(json).await.map_err(|_| SinkError::Closed)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Frame sink bound to one connection. Fails once the socket is gone.
#[derive(Clone)]
pub struct ConnectionSink(pub Arc<Connection>);

#[async_trait]
impl FrameSink for ConnectionSink {
    async fn send(&self, frame: ServerFrame) -> Result<(), SinkError> {
        self.0.send_frame(&frame).await
    }
}

/// All connected clients.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection::new(id.clone(), tx));
        self.connections.insert(id, Arc::clone(&connection));
        (connection, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.mark_disconnected();
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Drop connections that stopped answering pings.
    pub fn cleanup_dead(&self, timeout: Duration) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| !c.value().is_alive(timeout))
            .map(|c| c.key().clone())
            .collect();
        for id in &dead {
            self.unregister(id);
            info!(connection_id = %id, "dropped unresponsive connection");
        }
        dead.len()
    }
}

/// Pump a socket: queued frames and heartbeats out, text frames in.
///
/// Inbound text goes to `on_message` in arrival order. When the socket closes
/// the connection is marked disconnected, which stops forwarding for any
/// exchange still running on its behalf.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection: Arc<Connection>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ConnectionRegistry>,
    on_message: mpsc::Sender<String>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = connection.id.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(connection_id = %writer_id, "ping");
                }
            }
        }
    });

    let reader_conn = Arc::clone(&connection);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_conn.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    connection.mark_disconnected();
    registry.unregister(&connection.id);
    debug!(connection_id = %connection.id, session_id = ?connection.session_id(), "connection closed");
}

pub fn start_cleanup_task(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead(timeout);
            if removed > 0 {
                info!(removed, "dead connection cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(8);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.count(), 2);

        registry.unregister(&a.id);
        assert_eq!(registry.count(), 1);
        assert!(!a.is_connected());
        assert!(b.is_connected());
    }

    #[tokio::test]
    async fn sink_serializes_frames() {
        let registry = ConnectionRegistry::new(8);
        let (conn, mut rx) = registry.register();
        let sink = ConnectionSink(conn);
        sink.send(ServerFrame::Chunk { content: "hi".into() }).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "chunk", "content": "hi"}));
    }

    #[tokio::test]
    async fn sink_fails_after_disconnect() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register();
        registry.unregister(&conn.id);
        let sink = ConnectionSink(conn);
        assert_eq!(sink.send(ServerFrame::Pong).await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn sink_fails_when_receiver_dropped() {
        let registry = ConnectionRegistry::new(8);
        let (conn, rx) = registry.register();
        drop(rx);
        assert_eq!(conn.send_frame(&ServerFrame::Pong).await, Err(SinkError::Closed));
    }

    #[test]
    fn connection_tracks_latest_session() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register();
        assert!(conn.session_id().is_none());
        conn.set_session(SessionId::from_raw("s1"));
        conn.set_session(SessionId::from_raw("s2"));
        assert_eq!(conn.session_id(), Some(SessionId::from_raw("s2")));
    }

    #[test]
    fn fresh_connection_is_alive() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register();
        assert!(conn.is_alive(Duration::from_secs(90)));
        assert_eq!(registry.cleanup_dead(Duration::from_secs(90)), 0);
        assert_eq!(registry.cleanup_dead(Duration::ZERO), 1);
    }
}
