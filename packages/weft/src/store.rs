//! SQLite-backed store of executed tasks.
//!
//! The store maps a task fingerprint to the stats of the outputs it produced,
//! and is what makes re-execution incremental across process restarts. It
//! lives inside the workspace as a dot-prefixed file so directory listings
//! only show task outputs.
//!
//! Workers record concurrently; the connection sits behind a mutex and each
//! record is committed before the caller fires any completion signal, so a
//! restart never observes a completed task without its store entry.

use std::{path::Path, sync::Mutex};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::{
    error::{Error, Result},
    fingerprint::Fingerprint,
    fs::FileStat,
};

/// File name of the store inside a workspace.
pub const STORE_FILE: &str = ".weft.db";

/// Persistent mapping from fingerprint to recorded output stats.
#[derive(Debug)]
pub struct ExecutedTasks {
    conn: Mutex<Connection>,
}

impl ExecutedTasks {
    /// Open or create a store at the given path.
    #[instrument(name = "ExecutedTasks::open", skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .expect("mutex is poisoned")
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS executed_tasks (
                    fingerprint TEXT PRIMARY KEY,
                    outputs TEXT NOT NULL
                );
                "#,
            )?;
        Ok(())
    }

    /// Look up the recorded output stats for a fingerprint.
    #[instrument(name = "ExecutedTasks::lookup", skip(self))]
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<FileStat>>> {
        let conn = self.conn.lock().expect("mutex is poisoned");
        let data: Option<String> = conn
            .query_row(
                "SELECT outputs FROM executed_tasks WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|err| Error::Internal(format!("decode store record: {err}"))),
            None => Ok(None),
        }
    }

    /// Record the outputs a fingerprint produced.
    ///
    /// The row is committed before this returns.
    #[instrument(name = "ExecutedTasks::record", skip(self, outputs))]
    pub fn record(&self, fingerprint: &Fingerprint, outputs: &[FileStat]) -> Result<()> {
        let data = serde_json::to_string(outputs)
            .map_err(|err| Error::Internal(format!("encode store record: {err}")))?;

        self.conn.lock().expect("mutex is poisoned").execute(
            "INSERT OR REPLACE INTO executed_tasks (fingerprint, outputs) VALUES (?1, ?2)",
            params![fingerprint.as_str(), data],
        )?;
        Ok(())
    }

    /// Number of recorded fingerprints.
    #[allow(dead_code)]
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.lock().expect("mutex is poisoned").query_row(
            "SELECT COUNT(*) FROM executed_tasks",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
