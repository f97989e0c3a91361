//! Event and state types for the dispatch runtime.
//!
//! The envelope keeps base fields at the top level with an opaque JSON
//! `payload`; typed access is opt-in via [`RuntimeEventEnvelope::typed_payload`].

mod envelope;
pub mod payloads;
mod snapshot;

pub use envelope::{EventDraft, EventType, RuntimeEventEnvelope};
pub use snapshot::{AppliedOffset, PendingWrite, RunStatus, StateDelta, StateSnapshot, TokenBudget};
