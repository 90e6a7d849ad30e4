use tracing::{instrument, warn};

use parley_core::{ResponderId, SessionId, Turn, TurnId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, format_time};

const TURN_COLUMNS: &str = "session_id, turn_id, role, responder_id, content, error_kind, created_at";

/// Result of writing one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The identical turn was already stored (a retried write).
    AlreadyPresent,
}

/// Append-only turn log. Keyed by (session_id, turn_id); first writer wins.
pub struct TurnRepo {
    db: Database,
}

impl TurnRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn append(&self, turn: &Turn) -> Result<AppendOutcome, StoreError> {
        let mut outcomes = self.append_all(std::slice::from_ref(turn))?;
        Ok(outcomes.pop().unwrap_or(AppendOutcome::AlreadyPresent))
    }

    /// Write `turns` in one transaction. Either every turn is stored (or was
    /// already stored identically) or nothing is written.
    ///
    /// A key already holding different content is a `Conflict`.
    #[instrument(skip(self, turns), fields(count = turns.len()))]
    pub fn append_all(&self, turns: &[Turn]) -> Result<Vec<AppendOutcome>, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(turns.len());
            for turn in turns {
                let existing = {
                    let sql = format!(
                        "SELECT {TURN_COLUMNS} FROM turns WHERE session_id = ?1 AND turn_id = ?2"
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    let mut rows =
                        stmt.query(rusqlite::params![turn.session_id.as_str(), turn.turn_id.value()])?;
                    match rows.next()? {
                        Some(row) => Some(row_to_turn(row)?),
                        None => None,
                    }
                };

                match existing {
                    Some(stored) if stored.same_payload(turn) => {
                        outcomes.push(AppendOutcome::AlreadyPresent);
                    }
                    Some(_) => {
                        warn!(
                            session_id = %turn.session_id,
                            turn_id = %turn.turn_id,
                            "turn id already taken by different content"
                        );
                        return Err(StoreError::Conflict(format!(
                            "turn {} of session {} already written",
                            turn.turn_id, turn.session_id
                        )));
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO turns (session_id, turn_id, role, responder_id, content, error_kind, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            rusqlite::params![
                                turn.session_id.as_str(),
                                turn.turn_id.value(),
                                turn.role.to_string(),
                                turn.responder_id.as_ref().map(|r| r.as_str()),
                                turn.content,
                                turn.error_kind,
                                format_time(&turn.created_at),
                            ],
                        )?;
                        outcomes.push(AppendOutcome::Inserted);
                    }
                }
            }
            tx.commit()?;
            Ok(outcomes)
        })
    }

    /// One past the highest stored turn id; `TurnId::FIRST` for an empty session.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn next_turn_id(&self, session_id: &SessionId) -> Result<TurnId, StoreError> {
        self.db.with_conn(|conn| {
            let max: i64 = conn.query_row(
                "SELECT COALESCE(MAX(turn_id), 0) FROM turns WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(TurnId::new(max + 1))
        })
    }

    /// The `k` most recent turns, oldest first.
    #[instrument(skip(self), fields(session_id = %session_id, k))]
    pub fn recent(&self, session_id: &SessionId, k: usize) -> Result<Vec<Turn>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut turns = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {TURN_COLUMNS} FROM turns WHERE session_id = ?1
                 ORDER BY turn_id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), k as i64])?;
            let mut out = Vec::with_capacity(k);
            while let Some(row) = rows.next()? {
                out.push(row_to_turn(row)?);
            }
            Ok(out)
        })?;
        turns.reverse();
        Ok(turns)
    }

    /// Turns after `after` (exclusive), oldest first. Used for history replay.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_after(
        &self,
        session_id: &SessionId,
        after: Option<TurnId>,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let after = after.map(TurnId::value).unwrap_or(0);
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {TURN_COLUMNS} FROM turns WHERE session_id = ?1 AND turn_id > ?2
                 ORDER BY turn_id ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), after, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_turn(row)?);
            }
            Ok(out)
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<Turn, StoreError> {
    const T: &str = "turns";
    let role: String = row_helpers::get(row, 2, T, "role")?;
    let created_at: String = row_helpers::get(row, 6, T, "created_at")?;
    Ok(Turn {
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 0, T, "session_id")?),
        turn_id: TurnId::new(row_helpers::get(row, 1, T, "turn_id")?),
        role: row_helpers::parse_enum(&role, T, "role")?,
        responder_id: row_helpers::get_opt::<String>(row, 3, T, "responder_id")?.map(ResponderId::from_raw),
        content: row_helpers::get(row, 4, T, "content")?,
        error_kind: row_helpers::get_opt(row, 5, T, "error_kind")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
    })
}
