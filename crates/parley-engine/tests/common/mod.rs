#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::{Alert, AlertKind, AlertSink, FrameSink, ServerFrame, SessionId, SinkError, Turn, TurnId};
use parley_engine::{CoordinatorConfig, GenerationOptions, ResponderRegistry, StreamCoordinator};
use parley_llm::{MockReply, ScriptedGenerator};
use parley_settings::RespondersSettings;
use parley_store::{
    AppendOutcome, ConversationStore, Database, RetryPolicy, SqliteConversationStore, SqliteSessionStore, StoreError,
};

/// Records every frame. Optionally refuses frames after the first `accept`.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<ServerFrame>>,
    accept: Option<usize>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaves like a connection that drops after `n` frames.
    pub fn closing_after(n: usize) -> Self {
        Self { accept: Some(n), ..Self::default() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn frames(&self) -> Vec<ServerFrame> {
        self.frames.lock().clone()
    }

    /// Frame types in order, e.g. `["session", "chunk", "end"]`.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.frames
            .lock()
            .iter()
            .map(|f| match f {
                ServerFrame::Session { .. } => "session",
                ServerFrame::Chunk { .. } => "chunk",
                ServerFrame::End { .. } => "end",
                ServerFrame::Error { .. } => "error",
                ServerFrame::History { .. } => "history",
                ServerFrame::Sessions { .. } => "sessions",
                ServerFrame::Pong => "pong",
            })
            .collect()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Chunk { content } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_frames(&self) -> Vec<ServerFrame> {
        self.frames.lock().iter().filter(|f| f.is_terminal()).cloned().collect()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&self, frame: ServerFrame) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut frames = self.frames.lock();
        if self.accept.is_some_and(|n| frames.len() >= n) {
            return Err(SinkError::Closed);
        }
        frames.push(frame);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlerts {
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn of_kind(&self, kind: AlertKind) -> Vec<Alert> {
        self.alerts.lock().iter().filter(|a| a.kind == kind).cloned().collect()
    }
}

impl AlertSink for MemoryAlerts {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Conversation store that can be told to fail.
pub struct FlakyConversationStore {
    inner: SqliteConversationStore,
    failing_appends: AtomicU32,
    stale_next_id: AtomicBool,
    append_calls: AtomicU32,
}

impl FlakyConversationStore {
    pub fn new(inner: SqliteConversationStore) -> Self {
        Self {
            inner,
            failing_appends: AtomicU32::new(0),
            stale_next_id: AtomicBool::new(false),
            append_calls: AtomicU32::new(0),
        }
    }

    /// The next `n` `append_all` calls fail as unavailable.
    pub fn fail_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// The next `next_turn_id` call answers `1`, as a lagging replica would.
    pub fn stale_next_turn_id(&self) {
        self.stale_next_id.store(true, Ordering::SeqCst);
    }

    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for FlakyConversationStore {
    async fn append_all(&self, turns: &[Turn]) -> Result<Vec<AppendOutcome>, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.append_all(turns).await
    }

    async fn next_turn_id(&self, session_id: &SessionId) -> Result<TurnId, StoreError> {
        if self.stale_next_id.swap(false, Ordering::SeqCst) {
            return Ok(TurnId::FIRST);
        }
        self.inner.next_turn_id(session_id).await
    }

    async fn recent(&self, session_id: &SessionId, k: usize) -> Result<Vec<Turn>, StoreError> {
        self.inner.recent(session_id, k).await
    }

    async fn list_after(
        &self,
        session_id: &SessionId,
        after: Option<TurnId>,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        self.inner.list_after(session_id, after, limit).await
    }

    async fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.inner.count(session_id).await
    }
}

pub struct Harness {
    pub sessions: Arc<SqliteSessionStore>,
    pub turns: Arc<FlakyConversationStore>,
    pub alerts: Arc<MemoryAlerts>,
    pub generator: Arc<ScriptedGenerator>,
    pub coordinator: StreamCoordinator,
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        store_retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..CoordinatorConfig::default()
    }
}

pub fn harness(replies: Vec<MockReply>, config: CoordinatorConfig) -> Harness {
    let generator = Arc::new(ScriptedGenerator::new(replies));
    let registry = ResponderRegistry::build(
        &RespondersSettings::default(),
        generator.clone(),
        None,
        GenerationOptions::default(),
    )
    .unwrap();
    harness_with_registry(registry, generator, config)
}

pub fn harness_with_registry(
    registry: ResponderRegistry,
    generator: Arc<ScriptedGenerator>,
    config: CoordinatorConfig,
) -> Harness {
    let db = Database::in_memory().unwrap();
    let sessions = Arc::new(SqliteSessionStore::new(db.clone()));
    let turns = Arc::new(FlakyConversationStore::new(SqliteConversationStore::new(db)));
    let alerts = Arc::new(MemoryAlerts::default());
    let coordinator = StreamCoordinator::new(
        Arc::new(registry),
        sessions.clone(),
        turns.clone(),
        alerts.clone(),
        config,
    );
    Harness { sessions, turns, alerts, generator, coordinator }
}
