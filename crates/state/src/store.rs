// SPDX-License-Identifier: MIT

//! SQLite-backed state store (spec.md §4.1): three tables — `job_runs`,
//! `step_runs`, `locks` — each mutated through a single atomic
//! statement per call.

use crate::error::StateError;
use aetherflow_core::{JobStatus, StepStatus};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS job_runs (
    run_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, job_id)
);

CREATE TABLE IF NOT EXISTS step_runs (
    run_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    status TEXT NOT NULL,
    result_json TEXT,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, job_id, step_id)
);

CREATE TABLE IF NOT EXISTS locks (
    scope_key TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    acquired_at_ms INTEGER NOT NULL,
    ttl_seconds INTEGER NOT NULL
);
";

/// The run-once engine's durable state. One SQLite file per flow run
/// directory (spec.md §3 `StateSpec.path`).
pub struct StateStore {
    path: String,
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (creating if absent) the state database at `path` and
    /// ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(path).map_err(|source| StateError::Sqlite {
            path: display(path),
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(|source| StateError::Sqlite {
            path: display(path),
            source,
        })?;
        Ok(Self {
            path: display(path),
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store, used by tests and by dry-run validation that
    /// should never touch disk.
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|source| StateError::Sqlite {
            path: ":memory:".to_string(),
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(|source| StateError::Sqlite {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self {
            path: ":memory:".to_string(),
            conn: Mutex::new(conn),
        })
    }

    fn wrap(&self, source: rusqlite::Error) -> StateError {
        StateError::Sqlite {
            path: self.path.clone(),
            source,
        }
    }

    pub fn get_job_status(&self, run_id: &str, job_id: &str) -> Result<Option<JobStatus>, StateError> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT status FROM job_runs WHERE run_id = ?1 AND job_id = ?2",
                params![run_id, job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.wrap(e))?;
        match text {
            Some(s) => JobStatus::from_str(&s)
                .map(Some)
                .map_err(|_| StateError::CorruptStatus {
                    path: self.path.clone(),
                    value: s,
                }),
            None => Ok(None),
        }
    }

    pub fn set_job_status(
        &self,
        run_id: &str,
        job_id: &str,
        status: JobStatus,
        now_ms: u64,
    ) -> Result<(), StateError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO job_runs (run_id, job_id, status, updated_at_ms) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id, job_id) DO UPDATE SET status = excluded.status, updated_at_ms = excluded.updated_at_ms",
            params![run_id, job_id, status.to_string(), now_ms as i64],
        )
        .map_err(|e| self.wrap(e))?;
        Ok(())
    }

    pub fn get_step_status(
        &self,
        run_id: &str,
        job_id: &str,
        step_id: &str,
    ) -> Result<Option<StepStatus>, StateError> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT status FROM step_runs WHERE run_id = ?1 AND job_id = ?2 AND step_id = ?3",
                params![run_id, job_id, step_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.wrap(e))?;
        match text {
            Some(s) => StepStatus::from_str(&s)
                .map(Some)
                .map_err(|_| StateError::CorruptStatus {
                    path: self.path.clone(),
                    value: s,
                }),
            None => Ok(None),
        }
    }

    pub fn set_step_status(
        &self,
        run_id: &str,
        job_id: &str,
        step_id: &str,
        status: StepStatus,
        now_ms: u64,
    ) -> Result<(), StateError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO step_runs (run_id, job_id, step_id, status, updated_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id, job_id, step_id) DO UPDATE SET status = excluded.status, updated_at_ms = excluded.updated_at_ms",
            params![run_id, job_id, step_id, status.to_string(), now_ms as i64],
        )
        .map_err(|e| self.wrap(e))?;
        Ok(())
    }

    /// Like [`Self::set_step_status`], additionally persisting the
    /// step's rendered `result` so that a later resume can promote the
    /// step's `outputs` (which reference `result`) without invoking the
    /// step's `run` operation again (spec.md §3 invariant (e), §9
    /// "Skip-after-promotion consistency").
    pub fn set_step_result(
        &self,
        run_id: &str,
        job_id: &str,
        step_id: &str,
        status: StepStatus,
        result: &Value,
        now_ms: u64,
    ) -> Result<(), StateError> {
        let conn = self.conn.lock();
        let result_json = serde_json::to_string(result).unwrap_or_else(|_| "null".to_string());
        conn.execute(
            "INSERT INTO step_runs (run_id, job_id, step_id, status, result_json, updated_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_id, job_id, step_id) DO UPDATE SET status = excluded.status, result_json = excluded.result_json, updated_at_ms = excluded.updated_at_ms",
            params![run_id, job_id, step_id, status.to_string(), result_json, now_ms as i64],
        )
        .map_err(|e| self.wrap(e))?;
        Ok(())
    }

    /// Fetch a step's persisted status together with its `result`
    /// (`Value::Null` if the row predates `result_json`, e.g. written by
    /// [`Self::set_step_status`]).
    pub fn get_step_result(
        &self,
        run_id: &str,
        job_id: &str,
        step_id: &str,
    ) -> Result<Option<(StepStatus, Value)>, StateError> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT status, result_json FROM step_runs WHERE run_id = ?1 AND job_id = ?2 AND step_id = ?3",
                params![run_id, job_id, step_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| self.wrap(e))?;
        match row {
            Some((status_text, result_text)) => {
                let status = StepStatus::from_str(&status_text).map_err(|_| StateError::CorruptStatus {
                    path: self.path.clone(),
                    value: status_text,
                })?;
                let result = match result_text {
                    Some(text) => serde_json::from_str(&text).unwrap_or(Value::Null),
                    None => Value::Null,
                };
                Ok(Some((status, result)))
            }
            None => Ok(None),
        }
    }

    /// Acquire `scope_key` for `run_id`, stealing an expired lock
    /// (`acquired_at_ms + ttl_seconds*1000 < now_ms`) if one is found.
    /// Returns `true` if the lock is now held by `run_id`.
    pub fn try_acquire_lock(
        &self,
        scope_key: &str,
        run_id: &str,
        ttl_seconds: u64,
        now_ms: u64,
    ) -> Result<bool, StateError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| self.wrap(e))?;
        let existing: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT run_id, acquired_at_ms, ttl_seconds FROM locks WHERE scope_key = ?1",
                params![scope_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| StateError::Sqlite {
                path: self.path.clone(),
                source: e,
            })?;

        let acquired = match existing {
            None => true,
            Some((holder, acquired_at_ms, held_ttl_seconds)) if holder == run_id => {
                let _ = acquired_at_ms;
                let _ = held_ttl_seconds;
                true
            }
            Some((_, acquired_at_ms, held_ttl_seconds)) => {
                let expiry = acquired_at_ms.saturating_add(held_ttl_seconds.saturating_mul(1000));
                (now_ms as i64) >= expiry
            }
        };

        if acquired {
            tx.execute(
                "INSERT INTO locks (scope_key, run_id, acquired_at_ms, ttl_seconds) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope_key) DO UPDATE SET run_id = excluded.run_id, acquired_at_ms = excluded.acquired_at_ms, ttl_seconds = excluded.ttl_seconds",
                params![scope_key, run_id, now_ms as i64, ttl_seconds as i64],
            )
            .map_err(|e| StateError::Sqlite {
                path: self.path.clone(),
                source: e,
            })?;
        }
        tx.commit().map_err(|e| self.wrap(e))?;
        Ok(acquired)
    }

    /// Release `scope_key`, but only if it is still held by `run_id`.
    pub fn release_lock(&self, scope_key: &str, run_id: &str) -> Result<(), StateError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM locks WHERE scope_key = ?1 AND run_id = ?2",
            params![scope_key, run_id],
        )
        .map_err(|e| self.wrap(e))?;
        Ok(())
    }

    pub fn db_path(&self) -> &str {
        &self.path
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Resolve `path` relative to the workspace root if it is not already
/// absolute (spec.md §3 `StateSpec.path`).
pub fn resolve_state_path(workspace_root: &Path, configured: &str) -> PathBuf {
    let configured = Path::new(configured);
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        workspace_root.join(configured)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
