//! # helm-ledger
//!
//! Progress and task ledgers for the Helm dispatch runtime.
//!
//! - **Progress ledger**: task context extracted from a task markdown
//!   source, with an mtime+hash fingerprint for staleness detection.
//!   Extraction is the only ground truth for prompt compilation — the
//!   runtime refuses to synthesize task context it cannot find in the
//!   source document.
//! - **Task ledger**: per-(run, task) outcome tracking with stall-signature
//!   comparison, persisted through flat snapshot facts.
//!
//! ## Crate Position
//!
//! Depends on: helm-core. Depended on by: helm-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod progress;
pub mod task_ledger;

pub use errors::{LedgerError, Result};
pub use progress::{
    CurrentTask, ExtractArgs, LedgerTotals, ProgressLedger, SourceFingerprint, TaskPromptBuild,
    extract_progress_ledger,
};
pub use task_ledger::{TaskLedger, TaskOutcome};
