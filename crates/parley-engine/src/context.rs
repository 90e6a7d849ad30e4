use std::sync::Arc;

use tracing::instrument;

use parley_core::{ContextWindow, Session, SessionId};
use parley_store::{with_retry, ConversationStore, RetryPolicy, StoreError};

/// Derives the bounded history slice a responder sees.
#[derive(Clone)]
pub struct ContextBuilder {
    store: Arc<dyn ConversationStore>,
    retry: RetryPolicy,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn ConversationStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// The `window_size` most recent committed turns, oldest first.
    /// A window of zero never touches the store.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn build(&self, session_id: &SessionId, window_size: usize) -> Result<ContextWindow, StoreError> {
        if window_size == 0 {
            return Ok(ContextWindow::empty(session_id.clone()));
        }
        let turns = with_retry(&self.retry, "context.recent", || self.store.recent(session_id, window_size)).await?;
        Ok(ContextWindow::new(session_id.clone(), turns))
    }

    /// [`build`](Self::build) plus the session's running summary.
    pub async fn build_for(&self, session: &Session, window_size: usize) -> Result<ContextWindow, StoreError> {
        let window = self.build(&session.session_id, window_size).await?;
        Ok(window.with_summary(session.summary()))
    }
}
