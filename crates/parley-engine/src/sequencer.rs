//! Per-session commit ordering.
//!
//! Each exchange takes a ticket when it is admitted. A ticket's commit may only
//! start once every earlier ticket on the same session has been dropped.
//! Different sessions never wait on each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

use parley_core::SessionId;

struct Tail {
    seq: u64,
    released: oneshot::Receiver<()>,
}

#[derive(Clone, Default)]
pub struct CommitSequencer {
    lanes: Arc<DashMap<SessionId, Tail>>,
    next_seq: Arc<AtomicU64>,
}

impl CommitSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behind whatever is already admitted for `session_id`.
    pub fn admit(&self, session_id: &SessionId) -> CommitTicket {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self
            .lanes
            .insert(session_id.clone(), Tail { seq, released: rx })
            .map(|tail| tail.released);
        CommitTicket {
            lanes: Arc::clone(&self.lanes),
            session_id: session_id.clone(),
            seq,
            previous,
            release: Some(tx),
        }
    }

    /// Sessions with at least one outstanding ticket.
    pub fn active_sessions(&self) -> usize {
        self.lanes.len()
    }
}

/// Dropping the ticket lets the next exchange on the session commit.
pub struct CommitTicket {
    lanes: Arc<DashMap<SessionId, Tail>>,
    session_id: SessionId,
    seq: u64,
    previous: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl CommitTicket {
    /// Resolves once all earlier tickets on this session are released.
    pub async fn wait_turn(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // The sender is never used; a closed channel is the release signal.
            let _ = previous.await;
            self.previous = None;
        }
    }
}

impl Drop for CommitTicket {
    fn drop(&mut self) {
        let seq = self.seq;
        self.lanes.remove_if(&self.session_id, |_, tail| tail.seq == seq);

        // Released without waiting: keep later tickets behind the earlier ones.
        if let (Some(previous), Some(release)) = (self.previous.take(), self.release.take()) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = previous.await;
                    drop(release);
                });
            }
        }
    }
}
