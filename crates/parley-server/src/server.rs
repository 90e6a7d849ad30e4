use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_engine::StreamCoordinator;
use parley_settings::ParleySettings;

use crate::client::{self, Connection, ConnectionRegistry};
use crate::handlers::{self, HandlerState};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// How often idle sessions are swept into `expired`.
    pub expiry_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            expiry_sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms.max(1)),
            ..Self::default()
        }
    }

    /// Connections silent for three heartbeats are dropped.
    fn client_timeout(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub connections: Arc<ConnectionRegistry>,
    pub heartbeat_interval: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The returned handle keeps the server running until
/// [`ServerHandle::shutdown`] or drop.
pub async fn start(config: ServerConfig, coordinator: Arc<StreamCoordinator>) -> Result<ServerHandle, std::io::Error> {
    let connections = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let handler_state = Arc::new(HandlerState::new(Arc::clone(&coordinator), Arc::clone(&connections)));
    let state = AppState {
        handler_state,
        connections: Arc::clone(&connections),
        heartbeat_interval: config.heartbeat_interval,
    };

    let cleanup = client::start_cleanup_task(
        Arc::clone(&connections),
        config.heartbeat_interval,
        config.client_timeout(),
    );
    let expiry = start_expiry_task(Arc::clone(&coordinator), config.expiry_sweep_interval);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "parley server listening");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let router = build_router(state);
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server: Some(server),
        background: vec![cleanup, expiry],
    })
}

pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: Option<tokio::task::JoinHandle<()>>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the listener to close.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in self.background.drain(..) {
            task.abort();
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        info!("parley server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.background {
            task.abort();
        }
    }
}

fn start_expiry_task(coordinator: Arc<StreamCoordinator>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = coordinator.expire_idle_sessions().await {
                warn!(error = %e, "session expiry sweep failed");
            }
        }
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, rx) = state.connections.register();
    info!(connection_id = %connection.id, "client connected");

    // One frame at a time per connection. The worker outlives the socket so an
    // exchange in flight still reaches its commit after a disconnect.
    let (msg_tx, msg_rx) = mpsc::channel::<String>(32);
    tokio::spawn(process_frames(msg_rx, Arc::clone(&connection), Arc::clone(&state.handler_state)));

    client::handle_ws_connection(
        socket,
        connection,
        rx,
        Arc::clone(&state.connections),
        msg_tx,
        state.heartbeat_interval,
    )
    .await;
}

async fn process_frames(mut rx: mpsc::Receiver<String>, connection: Arc<Connection>, state: Arc<HandlerState>) {
    while let Some(raw) = rx.recv().await {
        handlers::dispatch(&state, &connection, &raw).await;
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.handler_state.health())
}
