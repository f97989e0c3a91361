//! The dispatch runtime: an event-sourced state machine for driving
//! external implementer/reviewer agents against a task list.
//!
//! ## Crate Position
//!
//! Sits on top of `helm-events` (event log, projection, snapshots) and
//! `helm-ledger` (task-source extraction, stall tracking). Exposes the
//! five runtime actions through [`manager::DispatchRuntimeManager`]:
//! `init_run`, `compile_prompt`, `ingest_output`, `get_snapshot`, and
//! `get_telemetry`. The prompt compiler, output contract, and telemetry
//! aggregator are usable on their own for embedding and testing.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod compiler;
pub mod contract;
pub mod errors;
pub mod manager;
pub mod telemetry;
pub mod types;

pub use compiler::{CompactionStage, CompiledDispatchPrompt, GuideMode, prompt_budget};
pub use contract::{
    DispatchResult, ImplementerResult, ImplementerStatus, ReviewerAssessment, ReviewerResult,
    extract_dispatch_result,
};
pub use errors::{ContractViolation, DispatchError, Result};
pub use manager::{
    Collaborators, CompilePromptArgs, DispatchRuntimeManager, IngestOutcome, IngestOutputArgs,
    InitRunArgs, RuntimeConfig,
};
pub use telemetry::{TelemetryAggregator, TelemetrySnapshot};
pub use types::{DispatchRole, NextAction};
