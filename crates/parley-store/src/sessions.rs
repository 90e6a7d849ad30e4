use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use parley_core::{Session, SessionId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, format_time};

const SESSION_COLUMNS: &str = "session_id, user_id, active_responder_id, title, summary, \
     message_count, status, metadata, created_at, last_active_at";

/// Result of an upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionWrite {
    Applied,
    /// A newer write (by `last_active_at`) was already stored; this one was dropped.
    Stale,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row).map(Some),
                None => Ok(None),
            }
        })
    }

    pub fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    /// Load the session, creating it if absent. A session owned by another user is rejected.
    /// Creating under a client-chosen id is idempotent: concurrent callers get the same row.
    #[instrument(skip(self), fields(session_id = ?id, user_id = %user_id))]
    pub fn get_or_create(&self, id: Option<&SessionId>, user_id: &UserId) -> Result<Session, StoreError> {
        let id = id.cloned().unwrap_or_default();
        let fresh = Session::new(id.clone(), user_id.clone());

        let inserted = self.db.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO sessions
                    (session_id, user_id, title, summary, message_count, status, metadata, created_at, last_active_at)
                 VALUES (?1, ?2, ?3, '', 0, 'active', '{}', ?4, ?4)",
                rusqlite::params![
                    fresh.session_id.as_str(),
                    fresh.user_id.as_str(),
                    fresh.title,
                    format_time(&fresh.created_at),
                ],
            )?;
            Ok(n == 1)
        })?;
        if inserted {
            info!(session_id = %id, "session created");
        }

        let session = self.get(&id)?;
        if !session.is_owned_by(user_id) {
            return Err(StoreError::Forbidden(format!("session {id} belongs to another user")));
        }
        Ok(session)
    }

    /// Upsert. Last writer wins by `last_active_at`: a write older than what is
    /// stored is dropped, so `last_active_at` never moves backwards.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub fn save(&self, session: &Session) -> Result<SessionWrite, StoreError> {
        let metadata = serde_json::to_string(&session.metadata)?;
        let changed = self.db.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO sessions
                    (session_id, user_id, active_responder_id, title, summary, message_count,
                     status, metadata, created_at, last_active_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(session_id) DO UPDATE SET
                    active_responder_id = excluded.active_responder_id,
                    title = excluded.title,
                    summary = excluded.summary,
                    message_count = excluded.message_count,
                    status = excluded.status,
                    metadata = excluded.metadata,
                    last_active_at = excluded.last_active_at
                 WHERE excluded.last_active_at >= sessions.last_active_at
                   AND sessions.user_id = excluded.user_id",
                rusqlite::params![
                    session.session_id.as_str(),
                    session.user_id.as_str(),
                    session.active_responder_id.as_ref().map(|r| r.as_str()),
                    session.title,
                    session.summary,
                    session.message_count,
                    session.status.to_string(),
                    metadata,
                    format_time(&session.created_at),
                    format_time(&session.last_active_at),
                ],
            )?;
            Ok(n)
        })?;

        if changed == 0 {
            debug!("stale session write dropped");
            Ok(SessionWrite::Stale)
        } else {
            Ok(SessionWrite::Applied)
        }
    }

    /// Soft-expire active sessions idle since before `cutoff`. Returns how many changed.
    #[instrument(skip(self))]
    pub fn expire_inactive(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let n = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE sessions SET status = 'expired'
                 WHERE status = 'active' AND last_active_at < ?1",
                [format_time(&cutoff)],
            )?)
        })?;
        if n > 0 {
            info!(expired = n, "sessions expired");
        }
        Ok(n)
    }

    /// Most recently active first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1
                 ORDER BY last_active_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![user_id.as_str(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_session(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    const T: &str = "sessions";
    let status: String = row_helpers::get(row, 6, T, "status")?;
    let metadata: String = row_helpers::get(row, 7, T, "metadata")?;
    let created_at: String = row_helpers::get(row, 8, T, "created_at")?;
    let last_active_at: String = row_helpers::get(row, 9, T, "last_active_at")?;
    Ok(Session {
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 0, T, "session_id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, T, "user_id")?),
        active_responder_id: row_helpers::get_opt::<String>(row, 2, T, "active_responder_id")?
            .map(parley_core::ResponderId::from_raw),
        title: row_helpers::get(row, 3, T, "title")?,
        summary: row_helpers::get(row, 4, T, "summary")?,
        message_count: row_helpers::get(row, 5, T, "message_count")?,
        status: row_helpers::parse_enum(&status, T, "status")?,
        metadata: row_helpers::parse_json(&metadata, T, "metadata")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        last_active_at: row_helpers::parse_time(&last_active_at, T, "last_active_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::SessionStatus;

    fn setup() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    fn user() -> UserId {
        UserId::from_raw("learner-1")
    }

    #[test]
    fn get_or_create_without_id_generates_one() {
        let repo = setup();
        let s = repo.get_or_create(None, &user()).unwrap();
        assert!(s.session_id.as_str().starts_with("sess_"));
        assert_eq!(s.title, "New Chat");
        assert_eq!(s.status, SessionStatus::Active);
        assert!(repo.find(&s.session_id).unwrap().is_some());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let repo = setup();
        let id = SessionId::from_raw("learner-1-abc");
        let a = repo.get_or_create(Some(&id), &user()).unwrap();
        let b = repo.get_or_create(Some(&id), &user()).unwrap();
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(repo.list_for_user(&user(), 10).unwrap().len(), 1);
    }

    #[test]
    fn other_users_session_is_forbidden() {
        let repo = setup();
        let id = SessionId::from_raw("shared");
        repo.get_or_create(Some(&id), &user()).unwrap();
        let err = repo.get_or_create(Some(&id), &UserId::from_raw("intruder")).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = setup();
        assert!(matches!(repo.get(&SessionId::from_raw("nope")), Err(StoreError::NotFound(_))));
        assert!(repo.find(&SessionId::from_raw("nope")).unwrap().is_none());
    }

    #[test]
    fn save_round_trips_fields() {
        let repo = setup();
        let mut s = repo.get_or_create(None, &user()).unwrap();
        s.set_active_responder("quizzer".into());
        s.summary = "fractions".into();
        s.message_count = 4;
        s.metadata.insert("grade".into(), "5".into());
        s.touch(s.last_active_at + chrono::Duration::seconds(1));
        assert_eq!(repo.save(&s).unwrap(), SessionWrite::Applied);

        let loaded = repo.get(&s.session_id).unwrap();
        assert_eq!(loaded.active_responder_id.unwrap().as_str(), "quizzer");
        assert_eq!(loaded.summary, "fractions");
        assert_eq!(loaded.message_count, 4);
        assert_eq!(loaded.metadata.get("grade").map(String::as_str), Some("5"));
    }

    #[test]
    fn stale_save_is_dropped() {
        let repo = setup();
        let base = repo.get_or_create(None, &user()).unwrap();

        let mut newer = base.clone();
        newer.touch(base.last_active_at + chrono::Duration::seconds(10));
        newer.set_active_responder("reviewer".into());
        repo.save(&newer).unwrap();

        let mut older = base.clone();
        older.touch(base.last_active_at + chrono::Duration::seconds(5));
        older.set_active_responder("quizzer".into());
        assert_eq!(repo.save(&older).unwrap(), SessionWrite::Stale);

        let loaded = repo.get(&base.session_id).unwrap();
        assert_eq!(loaded.active_responder_id.unwrap().as_str(), "reviewer");
        assert_eq!(format_time(&loaded.last_active_at), format_time(&newer.last_active_at));
    }

    #[test]
    fn save_same_payload_twice_is_harmless() {
        let repo = setup();
        let mut s = repo.get_or_create(None, &user()).unwrap();
        s.message_count = 2;
        repo.save(&s).unwrap();
        repo.save(&s).unwrap();
        assert_eq!(repo.get(&s.session_id).unwrap().message_count, 2);
    }

    #[test]
    fn expire_inactive_is_soft() {
        let repo = setup();
        let s = repo.get_or_create(None, &user()).unwrap();
        let n = repo.expire_inactive(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(n, 1);
        let loaded = repo.get(&s.session_id).unwrap();
        assert_eq!(loaded.status, SessionStatus::Expired);

        // Already expired sessions are not counted again.
        assert_eq!(repo.expire_inactive(Utc::now() + chrono::Duration::hours(1)).unwrap(), 0);
    }

    #[test]
    fn recent_sessions_survive_expiry() {
        let repo = setup();
        repo.get_or_create(None, &user()).unwrap();
        assert_eq!(repo.expire_inactive(Utc::now() - chrono::Duration::hours(1)).unwrap(), 0);
    }

    #[test]
    fn list_for_user_orders_by_activity() {
        let repo = setup();
        let a = repo.get_or_create(None, &user()).unwrap();
        let mut b = repo.get_or_create(None, &user()).unwrap();
        repo.get_or_create(None, &UserId::from_raw("someone-else")).unwrap();

        b.touch(b.last_active_at + chrono::Duration::minutes(1));
        repo.save(&b).unwrap();

        let list = repo.list_for_user(&user(), 10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].session_id, b.session_id);
        assert_eq!(list[1].session_id, a.session_id);
    }
}
