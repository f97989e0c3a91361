//! Ledger error types.
//!
//! All variants carry a stable `code()` so callers branch on typed values.
//! Ledger errors are raised before any prompt is compiled — the caller must
//! fix the source document, not retry.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised during ledger extraction and validation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The source file could not be read or did not parse as task markdown.
    #[error("failed to read or parse task source {path}: {message}")]
    ParseFailed {
        /// Source path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The source parsed but contains no tasks, or not the requested one.
    #[error("task source {path} has no task matching {task_id}")]
    MissingTasks {
        /// Source path.
        path: PathBuf,
        /// Task id that was requested.
        task_id: String,
    },

    /// A located task is missing required fields (prompt or description).
    #[error("task {task_id} is missing required fields: {}", missing.join(", "))]
    Incomplete {
        /// Task id that was located.
        task_id: String,
        /// Names of the absent fields.
        missing: Vec<String>,
    },
}

impl LedgerError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseFailed { .. } => "progress_ledger_parse_failed",
            Self::MissingTasks { .. } => "progress_ledger_missing_tasks",
            Self::Incomplete { .. } => "progress_ledger_incomplete",
        }
    }
}
