//! Async store interfaces used by the engine, and their SQLite implementations.
//! Repo calls run on the blocking pool so no async task holds a connection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_core::{Session, SessionId, Turn, TurnId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::sessions::{SessionRepo, SessionWrite};
use crate::turns::{AppendOutcome, TurnRepo};

/// Append-only log of turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Atomic, idempotent on (session_id, turn_id).
    async fn append_all(&self, turns: &[Turn]) -> Result<Vec<AppendOutcome>, StoreError>;
    async fn next_turn_id(&self, session_id: &SessionId) -> Result<TurnId, StoreError>;
    /// The `k` most recent turns, oldest first.
    async fn recent(&self, session_id: &SessionId, k: usize) -> Result<Vec<Turn>, StoreError>;
    async fn list_after(
        &self,
        session_id: &SessionId,
        after: Option<TurnId>,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError>;
    async fn count(&self, session_id: &SessionId) -> Result<u64, StoreError>;
}

/// Per-user session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError>;
    async fn get_or_create(
        &self,
        session_id: Option<&SessionId>,
        user_id: &UserId,
    ) -> Result<Session, StoreError>;
    async fn save(&self, session: &Session) -> Result<SessionWrite, StoreError>;
    async fn expire_inactive(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
    async fn list_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Session>, StoreError>;
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[derive(Clone)]
pub struct SqliteConversationStore {
    repo: Arc<TurnRepo>,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self { repo: Arc::new(TurnRepo::new(db)) }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append_all(&self, turns: &[Turn]) -> Result<Vec<AppendOutcome>, StoreError> {
        let repo = self.repo.clone();
        let turns = turns.to_vec();
        blocking(move || repo.append_all(&turns)).await
    }

    async fn next_turn_id(&self, session_id: &SessionId) -> Result<TurnId, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.clone();
        blocking(move || repo.next_turn_id(&sid)).await
    }

    async fn recent(&self, session_id: &SessionId, k: usize) -> Result<Vec<Turn>, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.clone();
        blocking(move || repo.recent(&sid, k)).await
    }

    async fn list_after(
        &self,
        session_id: &SessionId,
        after: Option<TurnId>,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.clone();
        blocking(move || repo.list_after(&sid, after, limit)).await
    }

    async fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.clone();
        blocking(move || repo.count(&sid)).await
    }
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    repo: Arc<SessionRepo>,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { repo: Arc::new(SessionRepo::new(db)) }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.clone();
        blocking(move || repo.find(&sid)).await
    }

    async fn get_or_create(
        &self,
        session_id: Option<&SessionId>,
        user_id: &UserId,
    ) -> Result<Session, StoreError> {
        let repo = self.repo.clone();
        let sid = session_id.cloned();
        let uid = user_id.clone();
        blocking(move || repo.get_or_create(sid.as_ref(), &uid)).await
    }

    async fn save(&self, session: &Session) -> Result<SessionWrite, StoreError> {
        let repo = self.repo.clone();
        let session = session.clone();
        blocking(move || repo.save(&session)).await
    }

    async fn expire_inactive(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let repo = self.repo.clone();
        blocking(move || repo.expire_inactive(cutoff)).await
    }

    async fn list_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Session>, StoreError> {
        let repo = self.repo.clone();
        let uid = user_id.clone();
        blocking(move || repo.list_for_user(&uid, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (SqliteSessionStore, SqliteConversationStore) {
        let db = Database::in_memory().unwrap();
        (SqliteSessionStore::new(db.clone()), SqliteConversationStore::new(db))
    }

    #[tokio::test]
    async fn async_round_trip() {
        let (sessions, turns) = stores();
        let user = UserId::from_raw("u1");
        let session = sessions.get_or_create(None, &user).await.unwrap();
        let sid = session.session_id.clone();

        let first = turns.next_turn_id(&sid).await.unwrap();
        let batch = vec![
            Turn::user(sid.clone(), first, "quiz me on fractions"),
            Turn::responder(sid.clone(), first.next(), "quizzer".into(), "What is 1/2 + 1/4?"),
        ];
        let outcomes = turns.append_all(&batch).await.unwrap();
        assert_eq!(outcomes, vec![AppendOutcome::Inserted, AppendOutcome::Inserted]);

        // Same keys again: nothing new.
        let outcomes = turns.append_all(&batch).await.unwrap();
        assert_eq!(outcomes, vec![AppendOutcome::AlreadyPresent, AppendOutcome::AlreadyPresent]);
        assert_eq!(turns.count(&sid).await.unwrap(), 2);

        let recent = turns.recent(&sid, 1).await.unwrap();
        assert_eq!(recent[0].content, "What is 1/2 + 1/4?");

        let mut updated = session.clone();
        updated.message_count = 2;
        updated.touch(Utc::now());
        assert_eq!(sessions.save(&updated).await.unwrap(), SessionWrite::Applied);
        assert_eq!(sessions.get(&sid).await.unwrap().unwrap().message_count, 2);
        assert_eq!(sessions.list_for_user(&user, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_session() {
        let (sessions, _) = stores();
        let sid = SessionId::from_raw("client-picked");
        let user = UserId::from_raw("u1");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = sessions.clone();
            let (sid, user) = (sid.clone(), user.clone());
            handles.push(tokio::spawn(async move { s.get_or_create(Some(&sid), &user).await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().session_id, sid);
        }
        assert_eq!(sessions.list_for_user(&user, 10).await.unwrap().len(), 1);
    }
}
