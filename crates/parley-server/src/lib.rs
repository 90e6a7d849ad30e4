pub mod client;
pub mod handlers;
pub mod server;

pub use client::{Connection, ConnectionRegistry, ConnectionSink};
pub use handlers::HandlerState;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
