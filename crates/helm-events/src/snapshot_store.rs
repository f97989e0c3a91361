//! Durable snapshot storage behind a substitutable trait.
//!
//! `upsert` replaces the full row for a run — there is no partial-field
//! patch at the store boundary. Merging happens one layer up, in the
//! projector/manager.

use std::collections::HashMap;

use parking_lot::RwLock;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::errors::Result;
use crate::log::ConnectionPool;
use crate::types::StateSnapshot;

/// Keyed snapshot store. Implementations must be safe for concurrent use.
pub trait SnapshotStore: Send + Sync {
    /// Fetch the snapshot for a run, if present.
    fn get(&self, run_id: &str) -> Result<Option<StateSnapshot>>;

    /// Replace the full row for the snapshot's run.
    fn upsert(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// SQLite-backed store sharing the event log's pool and migrations.
pub struct SqliteSnapshotStore {
    pool: ConnectionPool,
}

impl SqliteSnapshotStore {
    /// Create a store over an already-migrated pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    #[instrument(skip(self))]
    fn get(&self, run_id: &str) -> Result<Option<StateSnapshot>> {
        let conn = self.pool.get()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM snapshots WHERE run_id = ?1",
                [run_id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, snapshot), fields(run_id = %snapshot.run_id, status = %snapshot.status))]
    fn upsert(&self, snapshot: &StateSnapshot) -> Result<()> {
        let conn = self.pool.get()?;
        let body = serde_json::to_string(snapshot)?;
        let _ = conn.execute(
            "INSERT INTO snapshots (run_id, status, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
                 status = excluded.status,
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                snapshot.run_id,
                snapshot.status.as_str(),
                body,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<HashMap<String, StateSnapshot>>,
}

impl MemorySnapshotStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, run_id: &str) -> Result<Option<StateSnapshot>> {
        Ok(self.rows.read().get(run_id).cloned())
    }

    fn upsert(&self, snapshot: &StateSnapshot) -> Result<()> {
        let _ = self
            .rows
            .write()
            .insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
