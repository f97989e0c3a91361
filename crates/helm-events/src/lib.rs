//! # helm-events
//!
//! Event sourcing engine for the Helm dispatch runtime.
//!
//! - **Types**: [`RuntimeEventEnvelope`] (append-only, per-partition
//!   sequenced), typed payloads, [`StateSnapshot`] and [`StateDelta`]
//! - **Event log**: SQLite-backed append-only log with monotonic
//!   per-partition sequence numbers assigned at publish time
//! - **Event bus**: non-blocking broadcast fan-out to subscribers
//! - **Schema registry**: `(schema name, version)` → validation predicate
//! - **Projector**: pure `apply(event, prev) → StateDelta`, snapshot merge,
//!   a bounded-channel projector task, and full replay from the log
//! - **Snapshot store**: keyed store behind a trait, with SQLite and
//!   in-memory backends
//!
//! ## Crate Position
//!
//! Depends on: helm-core. Depended on by: helm-runtime.

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod log;
pub mod projector;
pub mod schema;
pub mod snapshot_store;
pub mod types;

pub use bus::EventBus;
pub use errors::{EventLogError, Result};
pub use log::{ConnectionPool, EventLog, new_in_memory, new_pool, run_migrations};
pub use projector::{ProjectorHandle, apply, merge, replay, spawn_projector};
pub use schema::SchemaRegistry;
pub use snapshot_store::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use types::{
    EventDraft, EventType, PendingWrite, RunStatus, RuntimeEventEnvelope, StateDelta,
    StateSnapshot, TokenBudget,
};
