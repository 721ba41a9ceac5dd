//! Durable per-team progress store.
//!
//! SQLite-backed, one row per team holding the whole `TeamSession` as
//! JSON. Writes are whole-record upserts; the monotonicity invariant
//! (no progression counter ever decreases) is enforced here at write
//! time, so no interleaving of auto-save and progression writes can
//! move a team backward.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::SessionError;
use crate::session::TeamSession;

/// Async-safe handle to the progress store.
///
/// Wraps `ProgressStore` behind `Arc<Mutex>` and runs all access on
/// tokio's blocking thread pool via `spawn_blocking`, preventing
/// synchronous SQLite I/O from tying up async worker threads. Holding
/// the mutex across a read-modify-write closure also makes each
/// transition atomic with respect to concurrent auto-saves.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<ProgressStore>>,
}

impl StoreHandle {
    pub fn new(store: ProgressStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ProgressStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}

pub struct ProgressStore {
    conn: Connection,
}

impl ProgressStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS team_sessions (
                    team_id INTEGER PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                ",
            )
            .context("Failed to create team_sessions table")?;
        Ok(())
    }

    /// Fetch a team's session. Absence is not an error: it signals
    /// "needs default initialization", which is the caller's job.
    pub fn get(&self, team_id: u32) -> Result<Option<TeamSession>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM team_sessions WHERE team_id = ?1",
                params![team_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query team session")?;

        match data {
            Some(json) => {
                let session: TeamSession = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt session record for team {team_id}"))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Upsert a whole session record.
    ///
    /// Rejects writes that would decrease `current_phase_index` or any
    /// phase's `current_question` relative to the stored row.
    pub fn put(&self, session: &TeamSession) -> Result<(), SessionError> {
        if let Some(existing) = self
            .get(session.team_id)
            .map_err(SessionError::Other)?
        {
            check_monotonic(&existing, session)?;
        }

        let json = serde_json::to_string(session)
            .context("Failed to serialize team session")
            .map_err(SessionError::Other)?;

        self.conn
            .execute(
                "INSERT INTO team_sessions (team_id, data, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(team_id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                params![session.team_id, json],
            )
            .context("Failed to write team session")
            .map_err(SessionError::Other)?;

        Ok(())
    }

    /// Fetch a session, creating and persisting a fresh one if absent.
    pub fn get_or_create(&self, team_id: u32) -> Result<TeamSession> {
        if let Some(session) = self.get(team_id)? {
            return Ok(session);
        }
        let session = TeamSession::new(team_id);
        self.put(&session)
            .map_err(|e| anyhow::anyhow!("Failed to persist new session: {e}"))?;
        tracing::info!(team_id, order = ?session.phase_order, "created team session");
        Ok(session)
    }

    /// All known team ids, for operator tooling.
    pub fn team_ids(&self) -> Result<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT team_id FROM team_sessions ORDER BY team_id")
            .context("Failed to prepare team id query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query team ids")?
            .collect::<std::result::Result<Vec<u32>, _>>()
            .context("Failed to read team id rows")?;
        Ok(ids)
    }

    /// Remove a team's record entirely. Operator tooling only; the
    /// event flow itself never deletes sessions.
    pub fn delete(&self, team_id: u32) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM team_sessions WHERE team_id = ?1",
                params![team_id],
            )
            .context("Failed to delete team session")?;
        Ok(affected > 0)
    }
}

/// The write-time monotonicity check: progression counters in `new`
/// must not regress relative to `old`.
fn check_monotonic(old: &TeamSession, new: &TeamSession) -> Result<(), SessionError> {
    if new.current_phase_index < old.current_phase_index {
        return Err(SessionError::Regression {
            team_id: new.team_id,
            detail: format!(
                "current_phase_index {} -> {}",
                old.current_phase_index, new.current_phase_index
            ),
        });
    }

    for (phase, old_progress) in &old.phase_progress {
        let new_question = new
            .phase_progress
            .get(phase)
            .map(|p| p.current_question)
            .unwrap_or(0);
        if new_question < old_progress.current_question {
            return Err(SessionError::Regression {
                team_id: new.team_id,
                detail: format!(
                    "phase {} current_question {} -> {}",
                    phase, old_progress.current_question, new_question
                ),
            });
        }
    }

    Ok(())
}
