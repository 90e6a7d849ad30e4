pub mod database;
pub mod error;
pub mod retry;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod store;
pub mod turns;

pub use database::{Database, DatabaseConfig};
pub use error::StoreError;
pub use retry::{with_retry, RetryPolicy};
pub use sessions::{SessionRepo, SessionWrite};
pub use store::{ConversationStore, SessionStore, SqliteConversationStore, SqliteSessionStore};
pub use turns::{AppendOutcome, TurnRepo};
