//! SQLite-backed append-only event log.
//!
//! `publish` assigns the next sequence number for the draft's partition,
//! stamps `event_id`/`schema_version`/`timestamp`, and inserts the row in a
//! single transaction. It never blocks on downstream consumers — fan-out is
//! the bus's job.
//!
//! INVARIANT: writes are serialized behind an in-process lock, and
//! `UNIQUE(partition_key, sequence)` enforces ordering at the DB level, so
//! sequence numbers are strictly increasing per partition.

use parking_lot::Mutex;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::Result;
use crate::types::{EventDraft, EventType, RuntimeEventEnvelope};

/// Current payload schema version stamped on published events.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Pooled `SQLite` connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// A single connection checked out of the pool.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open a pool against a database file.
pub fn new_pool(path: &str) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path);
    Ok(r2d2::Pool::builder().build(manager)?)
}

/// Open a pool against a fresh shared-cache in-memory database.
///
/// Shared cache with a unique URI name keeps every pooled connection on the
/// same database, which a plain `:memory:` manager would not.
pub fn new_in_memory() -> Result<ConnectionPool> {
    let uri = format!("file:helm-mem-{}?mode=memory&cache=shared", Uuid::now_v7());
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let manager = SqliteConnectionManager::file(uri).with_flags(flags);
    Ok(r2d2::Pool::builder().build(manager)?)
}

/// Create tables and indexes. Idempotent.
pub fn run_migrations(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            idempotency_key TEXT NOT NULL,
            partition_key TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            payload TEXT NOT NULL,
            causal_parent_event_id TEXT,
            UNIQUE(partition_key, sequence)
        );
        CREATE INDEX IF NOT EXISTS idx_events_partition
            ON events(partition_key, sequence);
        CREATE TABLE IF NOT EXISTS snapshots (
            run_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Append-only event log with per-partition sequencing.
pub struct EventLog {
    pool: ConnectionPool,
    write_lock: Mutex<()>,
}

impl EventLog {
    /// Create an event log over an already-migrated pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Create an in-memory log with migrations applied. For tests and
    /// ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        let pool = new_in_memory()?;
        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }
        Ok(Self::new(pool))
    }

    /// Borrow the underlying pool (shared with the snapshot store).
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Publish a draft: assign the next per-partition sequence, stamp id,
    /// schema version and timestamp, insert, and return the envelope.
    #[instrument(skip(self, draft), fields(partition = %draft.partition_key, event_type = %draft.event_type))]
    pub fn publish(&self, draft: EventDraft) -> Result<RuntimeEventEnvelope> {
        let _guard = self.write_lock.lock();
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let next_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE partition_key = ?1",
            [&draft.partition_key],
            |row| row.get(0),
        )?;

        let envelope = RuntimeEventEnvelope {
            event_id: Uuid::now_v7().to_string(),
            idempotency_key: draft.idempotency_key,
            partition_key: draft.partition_key,
            sequence: next_sequence,
            run_id: draft.run_id,
            step_id: draft.step_id,
            agent_id: draft.agent_id,
            event_type: draft.event_type,
            schema_version: CURRENT_SCHEMA_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload: draft.payload,
            causal_parent_event_id: draft.causal_parent_event_id,
        };

        let _ = tx.execute(
            "INSERT INTO events (
                event_id, idempotency_key, partition_key, sequence, run_id,
                step_id, agent_id, event_type, schema_version, timestamp,
                payload, causal_parent_event_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                envelope.event_id,
                envelope.idempotency_key,
                envelope.partition_key,
                envelope.sequence,
                envelope.run_id,
                envelope.step_id,
                envelope.agent_id,
                envelope.event_type.as_str(),
                envelope.schema_version,
                envelope.timestamp,
                envelope.payload.to_string(),
                envelope.causal_parent_event_id,
            ],
        )?;
        tx.commit()?;

        metrics::counter!("helm_events_published_total").increment(1);
        debug!(sequence = envelope.sequence, "event published");
        Ok(envelope)
    }

    /// All events for a partition, ordered by sequence.
    pub fn events_for_partition(&self, partition_key: &str) -> Result<Vec<RuntimeEventEnvelope>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, idempotency_key, partition_key, sequence, run_id,
                    step_id, agent_id, event_type, schema_version, timestamp,
                    payload, causal_parent_event_id
             FROM events WHERE partition_key = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map([partition_key], row_to_envelope)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Highest assigned sequence for a partition, if any events exist.
    pub fn last_sequence(&self, partition_key: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(sequence) FROM events WHERE partition_key = ?1",
            [partition_key],
            |row| row.get(0),
        )?;
        Ok(max)
    }
}

fn row_to_envelope(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuntimeEventEnvelope> {
    let event_type_str: String = row.get(7)?;
    let event_type = EventType::from_wire(&event_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown event type: {event_type_str}").into(),
        )
    })?;
    let payload_str: String = row.get(10)?;
    let payload: Value = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(RuntimeEventEnvelope {
        event_id: row.get(0)?,
        idempotency_key: row.get(1)?,
        partition_key: row.get(2)?,
        sequence: row.get(3)?,
        run_id: row.get(4)?,
        step_id: row.get(5)?,
        agent_id: row.get(6)?,
        event_type,
        schema_version: row.get(8)?,
        timestamp: row.get(9)?,
        payload,
        causal_parent_event_id: row.get(11)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(partition: &str) -> EventDraft {
        EventDraft {
            idempotency_key: format!("ik-{partition}"),
            partition_key: partition.to_string(),
            run_id: partition.to_string(),
            step_id: "step-1".into(),
            agent_id: "implementer".into(),
            event_type: EventType::StateDelta,
            payload: serde_json::json!({"reason": "test", "facts": []}),
            causal_parent_event_id: None,
        }
    }

    #[test]
    fn publish_assigns_sequential_numbers() {
        let log = EventLog::in_memory().unwrap();
        let e1 = log.publish(draft("run-1")).unwrap();
        let e2 = log.publish(draft("run-1")).unwrap();
        let e3 = log.publish(draft("run-1")).unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(e3.sequence, 3);
    }

    #[test]
    fn sequences_are_per_partition() {
        let log = EventLog::in_memory().unwrap();
        let a1 = log.publish(draft("run-a")).unwrap();
        let b1 = log.publish(draft("run-b")).unwrap();
        let a2 = log.publish(draft("run-a")).unwrap();
        assert_eq!(a1.sequence, 1);
        assert_eq!(b1.sequence, 1);
        assert_eq!(a2.sequence, 2);
    }

    #[test]
    fn publish_stamps_id_version_timestamp() {
        let log = EventLog::in_memory().unwrap();
        let e = log.publish(draft("run-1")).unwrap();
        assert!(!e.event_id.is_empty());
        assert_eq!(e.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(!e.timestamp.is_empty());
    }

    #[test]
    fn events_round_trip_through_storage() {
        let log = EventLog::in_memory().unwrap();
        let published = log.publish(draft("run-1")).unwrap();
        let events = log.events_for_partition("run-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], published);
    }

    #[test]
    fn events_ordered_by_sequence() {
        let log = EventLog::in_memory().unwrap();
        for _ in 0..5 {
            let _ = log.publish(draft("run-1")).unwrap();
        }
        let events = log.events_for_partition("run-1").unwrap();
        let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn last_sequence_tracks_partition() {
        let log = EventLog::in_memory().unwrap();
        assert!(log.last_sequence("run-1").unwrap().is_none());
        let _ = log.publish(draft("run-1")).unwrap();
        let _ = log.publish(draft("run-1")).unwrap();
        assert_eq!(log.last_sequence("run-1").unwrap(), Some(2));
        assert!(log.last_sequence("run-2").unwrap().is_none());
    }

    #[test]
    fn unknown_partition_empty() {
        let log = EventLog::in_memory().unwrap();
        assert!(log.events_for_partition("nope").unwrap().is_empty());
    }
}
