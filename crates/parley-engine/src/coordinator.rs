//! Drives one exchange: route, stream to the client, then commit.
//!
//! `Idle → Routing → Streaming → Committing → {Done, Failed}`
//!
//! Forwarding and committing are decoupled. A slow or closed connection only
//! stops forwarding; the responder is always drained and its output committed.
//! Terminal frames (`end` / `error`) go out after the commit step, exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use parley_core::{
    Alert, AlertKind, AlertSink, Completion, ConnectionId, ContextWindow, FrameSink, GenerationError,
    Responder, ResponderEvent, ResponderId, ServerFrame, Session, SessionId, Turn, TurnId, UserId,
};
use parley_settings::{ParleySettings, PartialPolicy};
use parley_store::{with_retry, AppendOutcome, ConversationStore, RetryPolicy, SessionStore, SessionWrite, StoreError};

use crate::context::ContextBuilder;
use crate::error::EngineError;
use crate::registry::ResponderRegistry;
use crate::router::{Route, Router};
use crate::sequencer::{CommitSequencer, CommitTicket};

const DEFAULT_FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SESSION_LIST: u32 = 50;
const MAX_SESSION_LIST: u32 = 200;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub context_window: usize,
    pub partial_policy: PartialPolicy,
    /// Per-frame budget for handing a frame to the connection.
    pub forward_timeout: Duration,
    /// Max gap between chunks once the first one has arrived.
    pub chunk_idle_timeout: Duration,
    pub store_retry: RetryPolicy,
    /// Turn-id reallocations before giving up on a commit.
    pub max_conflict_retries: u32,
    pub history_limit: usize,
    pub session_expiry: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            context_window: 8,
            partial_policy: PartialPolicy::Discard,
            forward_timeout: Duration::from_millis(250),
            chunk_idle_timeout: Duration::from_secs(60),
            store_retry: RetryPolicy::default(),
            max_conflict_retries: 3,
            history_limit: 100,
            session_expiry: Duration::from_secs(72 * 3600),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &ParleySettings) -> Self {
        let retry = &settings.store.retry;
        let convo = &settings.conversation;
        Self {
            context_window: convo.context_window,
            partial_policy: convo.partial_policy,
            forward_timeout: Duration::from_millis(settings.server.forward_timeout_ms),
            chunk_idle_timeout: Duration::from_secs(convo.chunk_idle_timeout_secs),
            store_retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                base_delay: Duration::from_millis(retry.base_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
            },
            history_limit: convo.history_limit,
            session_expiry: Duration::from_secs(convo.session_expiry_hours.saturating_mul(3600)),
            ..Self::default()
        }
    }
}

/// One client message to answer.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub connection_id: ConnectionId,
    pub session_id: Option<SessionId>,
    pub user_id: UserId,
    pub content: String,
    pub responder_hint: Option<ResponderId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Routing,
    Streaming,
    Committing,
    Done,
    Failed,
}

impl ExchangePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Routing may end early (bad session, empty message) straight into `Failed`.
    pub fn can_advance_to(self, next: ExchangePhase) -> bool {
        use ExchangePhase::*;
        matches!(
            (self, next),
            (Idle, Routing)
                | (Routing, Streaming)
                | (Routing, Failed)
                | (Streaming, Committing)
                | (Committing, Done)
                | (Committing, Failed)
        )
    }
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ephemeral state of one in-flight exchange.
#[derive(Debug)]
pub struct StreamState {
    pub connection_id: ConnectionId,
    pub session_id: Option<SessionId>,
    pub buffered_chunks: Vec<String>,
    pub committed: bool,
    phase: ExchangePhase,
}

impl StreamState {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            session_id: None,
            buffered_chunks: Vec::new(),
            committed: false,
            phase: ExchangePhase::Idle,
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn advance(&mut self, next: ExchangePhase) {
        if !self.phase.can_advance_to(next) {
            warn!(from = %self.phase, to = %next, "unexpected exchange transition");
        }
        debug!(connection_id = %self.connection_id, from = %self.phase, to = %next, "exchange phase");
        self.phase = next;
    }

    pub fn content(&self) -> String {
        self.buffered_chunks.concat()
    }
}

/// Writes that did not reach the store. Replaying them is idempotent:
/// the turns keep their `(session_id, turn_id)` keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingCommit {
    pub session: Session,
    pub turns: Vec<Turn>,
}

impl PendingCommit {
    /// Snapshot `session` as it would look once `turns` are stored.
    fn new(session: &Session, turns: Vec<Turn>) -> Self {
        let mut session = session.clone();
        record_commit(&mut session, &turns);
        Self { session, turns }
    }

    pub fn keys(&self) -> Vec<(SessionId, TurnId)> {
        self.turns.iter().map(|t| (t.session_id.clone(), t.turn_id)).collect()
    }
}

/// One page of committed turns plus the session's total.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryPage {
    pub turns: Vec<Turn>,
    pub total_turns: u64,
}

#[derive(Debug)]
pub enum ExchangeOutcome {
    /// Responder finished; user and responder turns are committed.
    Completed {
        session_id: SessionId,
        responder_id: ResponderId,
        turn_id: TurnId,
        content: String,
        metadata: BTreeMap<String, String>,
    },
    /// Generation failed; whatever the partial policy allows is committed.
    GenerationFailed {
        session_id: SessionId,
        responder_id: ResponderId,
        error: GenerationError,
        committed: Vec<TurnId>,
    },
    /// Content may have reached the client but could not be stored.
    Failed {
        session_id: SessionId,
        pending: PendingCommit,
        error: StoreError,
    },
}

impl ExchangeOutcome {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Completed { session_id, .. }
            | Self::GenerationFailed { session_id, .. }
            | Self::Failed { session_id, .. } => session_id,
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        match self {
            Self::Failed { .. } => ExchangePhase::Failed,
            _ => ExchangePhase::Done,
        }
    }
}

/// Best-effort frame delivery. The first failure or timeout disables it.
struct Forwarder<'a> {
    sink: &'a dyn FrameSink,
    timeout: Duration,
    live: bool,
}

impl<'a> Forwarder<'a> {
    fn new(sink: &'a dyn FrameSink, timeout: Duration) -> Self {
        Self { sink, timeout, live: true }
    }

    async fn send(&mut self, frame: ServerFrame) -> bool {
        if !self.live {
            return false;
        }
        match tokio::time::timeout(self.timeout, self.sink.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "connection gone, forwarding stopped");
                self.live = false;
                false
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "forward timed out, forwarding stopped");
                self.live = false;
                false
            }
        }
    }
}

/// The responder turn to commit, if any.
struct ReplyDraft {
    responder_id: ResponderId,
    content: String,
    error_kind: Option<String>,
}

pub struct StreamCoordinator {
    router: Router,
    registry: Arc<ResponderRegistry>,
    context: ContextBuilder,
    sessions: Arc<dyn SessionStore>,
    conversations: Arc<dyn ConversationStore>,
    alerts: Arc<dyn AlertSink>,
    sequencer: CommitSequencer,
    config: CoordinatorConfig,
}

impl StreamCoordinator {
    pub fn new(
        registry: Arc<ResponderRegistry>,
        sessions: Arc<dyn SessionStore>,
        conversations: Arc<dyn ConversationStore>,
        alerts: Arc<dyn AlertSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            router: registry.router(),
            context: ContextBuilder::new(Arc::clone(&conversations), config.store_retry.clone()),
            registry,
            sessions,
            conversations,
            alerts,
            sequencer: CommitSequencer::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    /// Answer one message, streaming frames to `sink`. Returns `Err` only when
    /// the exchange could not get as far as streaming (an error frame is sent).
    #[instrument(skip_all, fields(connection_id = %exchange.connection_id, user_id = %exchange.user_id))]
    pub async fn run_exchange(&self, exchange: Exchange, sink: &dyn FrameSink) -> Result<ExchangeOutcome, EngineError> {
        let mut state = StreamState::new(exchange.connection_id.clone());
        let mut forwarder = Forwarder::new(sink, self.config.forward_timeout);
        state.advance(ExchangePhase::Routing);

        let prepared = self.prepare(&exchange).await;
        let (mut session, route, responder) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "exchange rejected before streaming");
                state.advance(ExchangePhase::Failed);
                forwarder.send(ServerFrame::error(e.error_kind(), e.client_message())).await;
                return Err(e);
            }
        };
        let session_id = session.session_id.clone();
        state.session_id = Some(session_id.clone());
        let ticket = self.sequencer.admit(&session_id);

        info!(session_id = %session_id, responder = %route.responder_id, reason = %route.reason, "routed");
        forwarder
            .send(ServerFrame::Session {
                session_id: session_id.clone(),
                responder_id: route.responder_id.clone(),
            })
            .await;

        let window = match self.context.build_for(&session, self.config.context_window).await {
            Ok(window) => window,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "context unavailable, answering without history");
                ContextWindow::empty(session_id.clone()).with_summary(session.summary())
            }
        };
        let first_chunk_timeout = self
            .registry
            .descriptor(&route.responder_id)
            .map(|d| d.timeout)
            .unwrap_or(DEFAULT_FIRST_CHUNK_TIMEOUT);

        state.advance(ExchangePhase::Streaming);
        let result = self
            .stream_response(responder.as_ref(), &window, &exchange.content, first_chunk_timeout, &mut state, &mut forwarder)
            .await;

        state.advance(ExchangePhase::Committing);
        let reply = match &result {
            Ok(_) => Some(ReplyDraft {
                responder_id: route.responder_id.clone(),
                content: state.content(),
                error_kind: None,
            }),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, chunks = state.buffered_chunks.len(), "generation failed");
                match self.config.partial_policy {
                    PartialPolicy::PersistPartial if !state.buffered_chunks.is_empty() => Some(ReplyDraft {
                        responder_id: route.responder_id.clone(),
                        content: state.content(),
                        error_kind: Some(e.error_kind().to_string()),
                    }),
                    _ => None,
                }
            }
        };

        match self.commit(ticket, &mut session, &exchange.content, reply).await {
            Ok(turns) => {
                state.committed = true;
                state.advance(ExchangePhase::Done);
                let committed: Vec<TurnId> = turns.iter().map(|t| t.turn_id).collect();
                match result {
                    Ok(completion) => {
                        let turn_id = committed.last().copied().unwrap_or(TurnId::FIRST);
                        forwarder.send(ServerFrame::End { turn_id }).await;
                        info!(session_id = %session_id, %turn_id, "exchange done");
                        Ok(ExchangeOutcome::Completed {
                            session_id,
                            responder_id: route.responder_id,
                            turn_id,
                            content: state.content(),
                            metadata: completion.metadata,
                        })
                    }
                    Err(error) => {
                        forwarder.send(ServerFrame::error(error.error_kind(), error.client_message())).await;
                        Ok(ExchangeOutcome::GenerationFailed {
                            session_id,
                            responder_id: route.responder_id,
                            error,
                            committed,
                        })
                    }
                }
            }
            Err((pending, error)) => {
                state.advance(ExchangePhase::Failed);
                self.raise_persistence_alert(&pending, &error);
                forwarder
                    .send(ServerFrame::error(
                        AlertKind::PersistenceFailed.as_str(),
                        "Your conversation could not be saved. Please try again.",
                    ))
                    .await;
                Ok(ExchangeOutcome::Failed { session_id, pending, error })
            }
        }
    }

    async fn prepare(&self, exchange: &Exchange) -> Result<(Session, Route, Arc<dyn Responder>), EngineError> {
        if exchange.content.trim().is_empty() {
            return Err(EngineError::InvalidMessage("Message is empty.".into()));
        }
        let mut session = with_retry(&self.config.store_retry, "sessions.get_or_create", || {
            self.sessions.get_or_create(exchange.session_id.as_ref(), &exchange.user_id)
        })
        .await?;
        let route = self.router.select(&mut session, &exchange.content, exchange.responder_hint.as_ref());
        let responder = match self.registry.resolve(&route.responder_id) {
            Ok(responder) => responder,
            Err(e) => {
                warn!(error = %e, "falling back to default responder");
                self.registry.resolve(self.registry.default_responder())?
            }
        };
        Ok((session, route, responder))
    }

    async fn stream_response(
        &self,
        responder: &dyn Responder,
        window: &ContextWindow,
        message: &str,
        first_chunk_timeout: Duration,
        state: &mut StreamState,
        forwarder: &mut Forwarder<'_>,
    ) -> Result<Completion, GenerationError> {
        let deadline = Instant::now() + first_chunk_timeout;
        let mut stream = tokio::time::timeout_at(deadline, responder.handle(window, message))
            .await
            .map_err(|_| GenerationError::Timeout(first_chunk_timeout))??;

        loop {
            let next = if state.buffered_chunks.is_empty() {
                tokio::time::timeout_at(deadline, stream.next())
                    .await
                    .map_err(|_| GenerationError::Timeout(first_chunk_timeout))?
            } else {
                let idle = self.config.chunk_idle_timeout;
                tokio::time::timeout(idle, stream.next())
                    .await
                    .map_err(|_| GenerationError::Timeout(idle))?
            };

            match next {
                Some(ResponderEvent::Chunk { text }) => {
                    if text.is_empty() {
                        continue;
                    }
                    forwarder.send(ServerFrame::Chunk { content: text.clone() }).await;
                    state.buffered_chunks.push(text);
                }
                Some(ResponderEvent::Done { completion }) => {
                    if state.buffered_chunks.is_empty() && !completion.content.is_empty() {
                        forwarder.send(ServerFrame::Chunk { content: completion.content.clone() }).await;
                        state.buffered_chunks.push(completion.content.clone());
                    }
                    return Ok(completion);
                }
                Some(ResponderEvent::Error { error }) => return Err(error),
                None => {
                    return Err(GenerationError::StreamInterrupted(
                        "responder stream ended without completion".into(),
                    ))
                }
            }
        }
    }

    /// Append the exchange's turns in session order, then record the session update.
    async fn commit(
        &self,
        mut ticket: CommitTicket,
        session: &mut Session,
        user_content: &str,
        reply: Option<ReplyDraft>,
    ) -> Result<Vec<Turn>, (PendingCommit, StoreError)> {
        ticket.wait_turn().await;
        let session_id = session.session_id.clone();
        let retry = &self.config.store_retry;
        let mut conflicts = 0;

        let turns = loop {
            let first = match with_retry(retry, "turns.next_turn_id", || self.conversations.next_turn_id(&session_id)).await {
                Ok(id) => id,
                Err(e) => {
                    // Committed turns are gapless, so the count predicts the next id.
                    let guess = TurnId::FIRST.offset(session.message_count as usize);
                    let turns = draft_turns(&session_id, guess, user_content, reply.as_ref());
                    return Err((PendingCommit::new(session, turns), e));
                }
            };
            let turns = draft_turns(&session_id, first, user_content, reply.as_ref());

            match with_retry(retry, "turns.append_all", || self.conversations.append_all(&turns)).await {
                Ok(outcomes) => {
                    let replayed = outcomes.iter().filter(|o| **o == AppendOutcome::AlreadyPresent).count();
                    if replayed > 0 {
                        debug!(session_id = %session_id, replayed, "turns already present");
                    }
                    break turns;
                }
                Err(StoreError::Conflict(detail)) if conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                    warn!(session_id = %session_id, first_turn_id = %first, attempt = conflicts, "turn id taken, reallocating");
                    self.alerts.raise(
                        Alert::new(AlertKind::TurnConflict, Some(session_id.clone()), detail)
                            .with_payload(serde_json::json!({ "first_turn_id": first, "attempt": conflicts })),
                    );
                }
                Err(e) => return Err((PendingCommit::new(session, turns), e)),
            }
        };

        record_commit(session, &turns);
        let current: &Session = session;
        match with_retry(retry, "sessions.save", || self.sessions.save(current)).await {
            Ok(SessionWrite::Applied) => {}
            Ok(SessionWrite::Stale) => debug!(session_id = %session_id, "newer session state already stored"),
            Err(e) => return Err((PendingCommit::new(session, turns), e)),
        }
        drop(ticket);
        Ok(turns)
    }

    fn raise_persistence_alert(&self, pending: &PendingCommit, error: &StoreError) {
        let session_id = pending.session.session_id.clone();
        let alert = Alert::new(AlertKind::PersistenceFailed, Some(session_id), error.to_string());
        let alert = match serde_json::to_value(pending) {
            Ok(payload) => alert.with_payload(payload),
            Err(e) => {
                warn!(error = %e, "could not serialize pending commit");
                alert
            }
        };
        self.alerts.raise(alert);
    }

    /// Replay a failed commit.
    ///
    /// Runs in the session's commit order. If a later exchange took the pending
    /// turn ids, the turns are renumbered after the current tail and the new ids
    /// are written back into `pending`, so replaying the same value again is a
    /// no-op.
    #[instrument(skip_all, fields(session_id = %pending.session.session_id, turns = pending.turns.len()))]
    pub async fn retry_commit(&self, pending: &mut PendingCommit) -> Result<Vec<AppendOutcome>, EngineError> {
        let session_id = pending.session.session_id.clone();
        let retry = &self.config.store_retry;
        let mut ticket = self.sequencer.admit(&session_id);
        ticket.wait_turn().await;

        let mut conflicts = 0;
        let outcomes = loop {
            let attempt = with_retry(retry, "turns.append_all", || self.conversations.append_all(&pending.turns)).await;
            match attempt {
                Ok(outcomes) => break outcomes,
                Err(StoreError::Conflict(detail)) if conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                    let first = with_retry(retry, "turns.next_turn_id", || self.conversations.next_turn_id(&session_id))
                        .await?;
                    warn!(first_turn_id = %first, attempt = conflicts, "pending turn ids taken, renumbering");
                    self.alerts.raise(
                        Alert::new(AlertKind::TurnConflict, Some(session_id.clone()), detail)
                            .with_payload(serde_json::json!({ "first_turn_id": first, "attempt": conflicts })),
                    );
                    for (offset, turn) in pending.turns.iter_mut().enumerate() {
                        turn.turn_id = first.offset(offset);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        // A later exchange may have moved the session on; build on the stored row.
        let mut session = with_retry(retry, "sessions.get", || self.sessions.get(&session_id))
            .await?
            .unwrap_or_else(|| pending.session.clone());
        record_commit(&mut session, &pending.turns);
        let current = &session;
        with_retry(retry, "sessions.save", || self.sessions.save(current)).await?;
        pending.session = session;
        drop(ticket);

        info!(?outcomes, keys = ?pending.keys(), "pending commit replayed");
        Ok(outcomes)
    }

    /// Committed turns after `after`, for a client catching up on reconnect.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn history(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        after: Option<TurnId>,
        limit: Option<usize>,
    ) -> Result<HistoryPage, EngineError> {
        let retry = &self.config.store_retry;
        let session = with_retry(retry, "sessions.get", || self.sessions.get(session_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        if !session.is_owned_by(user_id) {
            return Err(StoreError::Forbidden(format!("session {session_id}")).into());
        }
        let limit = limit.unwrap_or(self.config.history_limit).min(self.config.history_limit);
        let turns = with_retry(retry, "turns.list_after", || self.conversations.list_after(session_id, after, limit)).await?;
        let total_turns = with_retry(retry, "turns.count", || self.conversations.count(session_id)).await?;
        Ok(HistoryPage { turns, total_turns })
    }

    /// Sessions owned by `user_id`, most recently active first. The flag is set
    /// when the list was cut at `limit`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn sessions_for(&self, user_id: &UserId, limit: Option<u32>) -> Result<(Vec<Session>, bool), EngineError> {
        let limit = limit.unwrap_or(DEFAULT_SESSION_LIST).clamp(1, MAX_SESSION_LIST);
        let mut sessions = with_retry(&self.config.store_retry, "sessions.list_for_user", || {
            self.sessions.list_for_user(user_id, limit + 1)
        })
        .await?;
        let has_more = sessions.len() > limit as usize;
        sessions.truncate(limit as usize);
        Ok((sessions, has_more))
    }

    /// Soft-expire sessions idle for longer than the configured expiry.
    pub async fn expire_idle_sessions(&self) -> Result<usize, EngineError> {
        let expiry = chrono::Duration::from_std(self.config.session_expiry)
            .map_err(|e| EngineError::Config(format!("session expiry: {e}")))?;
        let cutoff = Utc::now() - expiry;
        let expired = self.sessions.expire_inactive(cutoff).await?;
        if expired > 0 {
            info!(expired, "sessions expired");
        }
        Ok(expired)
    }
}

/// Session bookkeeping for a commit of `turns`.
fn record_commit(session: &mut Session, turns: &[Turn]) {
    session.touch(Utc::now());
    if let Some(last) = turns.last() {
        let last_id = u32::try_from(last.turn_id.value()).unwrap_or(u32::MAX);
        session.message_count = session.message_count.max(last_id);
    }
}

fn draft_turns(session_id: &SessionId, first: TurnId, user_content: &str, reply: Option<&ReplyDraft>) -> Vec<Turn> {
    let mut turns = vec![Turn::user(session_id.clone(), first, user_content)];
    if let Some(reply) = reply {
        let mut turn = Turn::responder(session_id.clone(), first.next(), reply.responder_id.clone(), reply.content.clone());
        turn.error_kind = reply.error_kind.clone();
        turns.push(turn);
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions() {
        use ExchangePhase::*;
        assert!(Idle.can_advance_to(Routing));
        assert!(Routing.can_advance_to(Streaming));
        assert!(Streaming.can_advance_to(Committing));
        assert!(Committing.can_advance_to(Done));
        assert!(Committing.can_advance_to(Failed));
        assert!(!Streaming.can_advance_to(Done));
        assert!(!Done.can_advance_to(Routing));
        assert!(Done.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn stream_state_concatenates_chunks() {
        let mut state = StreamState::new(ConnectionId::from_raw("c1"));
        state.buffered_chunks.extend(["x".to_string(), " ".to_string(), "y".to_string()]);
        assert_eq!(state.content(), "x y");
        assert_eq!(state.phase(), ExchangePhase::Idle);
        state.advance(ExchangePhase::Routing);
        assert_eq!(state.phase(), ExchangePhase::Routing);
    }

    #[test]
    fn draft_turns_are_consecutive() {
        let sid = SessionId::from_raw("s");
        let reply = ReplyDraft {
            responder_id: "quizzer".into(),
            content: "Q1".into(),
            error_kind: Some("timeout".into()),
        };
        let turns = draft_turns(&sid, TurnId::new(7), "quiz me", Some(&reply));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_id, TurnId::new(7));
        assert_eq!(turns[1].turn_id, TurnId::new(8));
        assert!(turns[1].is_partial());

        let only_user = draft_turns(&sid, TurnId::FIRST, "hi", None);
        assert_eq!(only_user.len(), 1);
    }

    #[test]
    fn config_from_settings() {
        let mut settings = ParleySettings::default();
        settings.conversation.context_window = 2;
        settings.conversation.partial_policy = PartialPolicy::PersistPartial;
        settings.store.retry.max_attempts = 5;
        let config = CoordinatorConfig::from_settings(&settings);
        assert_eq!(config.context_window, 2);
        assert_eq!(config.partial_policy, PartialPolicy::PersistPartial);
        assert_eq!(config.store_retry.max_attempts, 5);
        assert_eq!(config.forward_timeout, Duration::from_millis(250));
    }

    #[test]
    fn pending_commit_keys() {
        let sid = SessionId::from_raw("s");
        let pending = PendingCommit {
            session: Session::new(sid.clone(), UserId::from_raw("u")),
            turns: draft_turns(&sid, TurnId::new(3), "hi", None),
        };
        assert_eq!(pending.keys(), vec![(sid, TurnId::new(3))]);
    }
}
