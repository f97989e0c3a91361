//! Error types for the dispatch runtime.
//!
//! Contract failures (malformed agent output) form their own category:
//! they carry a terminal next action because a run cannot make progress
//! once the structured output channel has broken down.

use helm_events::errors::EventLogError;
use helm_ledger::errors::LedgerError;
use thiserror::Error;

use crate::types::NextAction;

/// Runtime result alias.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Which part of the output contract was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// The delimiter pair was absent, duplicated, or had trailing text.
    MarkerMissing,
    /// The delimited body was not valid JSON.
    JsonParseFailed,
    /// The JSON parsed but did not satisfy the result schema.
    SchemaInvalid,
}

impl ContractViolation {
    /// Stable wire code for this violation.
    pub fn code(&self) -> &'static str {
        match self {
            ContractViolation::MarkerMissing => "marker_missing",
            ContractViolation::JsonParseFailed => "json_parse_failed",
            ContractViolation::SchemaInvalid => "schema_invalid",
        }
    }
}

/// Errors surfaced by the dispatch runtime actions.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Agent output broke the delimited output contract.
    #[error("contract violation ({}): {message}", kind.code())]
    Contract {
        /// Which rule was violated.
        kind: ContractViolation,
        /// Detail for logs; not machine-parsed.
        message: String,
    },

    /// An action was called before `init_run` bound the run.
    #[error("run {run_id} has not been initialized")]
    RunNotInitialized {
        /// The unbound run.
        run_id: String,
    },

    /// The caller named a task other than the one the run is bound to.
    #[error("run {run_id} is bound to task {bound_task_id}, not {requested_task_id}")]
    RunTaskMismatch {
        /// The run in question.
        run_id: String,
        /// Task bound at `init_run`.
        bound_task_id: String,
        /// Task the caller asked for.
        requested_task_id: String,
    },

    /// Even stage-C compaction could not fit the prompt into the budget.
    #[error(
        "prompt for {role} still exceeds budget after deepest compaction \
         ({prompt_tokens} tokens > {budget} budget)"
    )]
    PromptOverflowTerminal {
        /// Role being compiled.
        role: String,
        /// Best achieved token estimate.
        prompt_tokens: u32,
        /// Budget that had to be met.
        budget: u32,
    },

    /// Well-formed output exceeded the caller-supplied output cap.
    #[error("output estimated at {output_tokens} tokens exceeds cap of {max_output_tokens}")]
    OutputTokenBudgetExceeded {
        /// Estimated tokens in the output.
        output_tokens: u32,
        /// Caller-supplied cap.
        max_output_tokens: u32,
    },

    /// An external collaborator (classifier, routing, fact store) failed.
    #[error("collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// Progress/task ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Event log, schema, or snapshot store failure.
    #[error(transparent)]
    Events(#[from] EventLogError),
}

impl DispatchError {
    /// Stable machine-readable code, recorded in telemetry and error events.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Contract { kind, .. } => kind.code(),
            DispatchError::RunNotInitialized { .. } => "run_not_initialized",
            DispatchError::RunTaskMismatch { .. } => "run_task_mismatch",
            DispatchError::PromptOverflowTerminal { .. } => "dispatch_prompt_overflow_terminal",
            DispatchError::OutputTokenBudgetExceeded { .. } => "output_token_budget_exceeded",
            DispatchError::Collaborator(_) => "collaborator_failed",
            DispatchError::Ledger(err) => err.code(),
            DispatchError::Events(err) => err.code(),
        }
    }

    /// The next action a caller should take, when the error itself
    /// determines one. Only contract violations are terminal in this way.
    pub fn next_action(&self) -> Option<NextAction> {
        match self {
            DispatchError::Contract { .. } => Some(NextAction::HaltSchemaInvalidTerminal),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_errors_carry_terminal_next_action() {
        let err = DispatchError::Contract {
            kind: ContractViolation::MarkerMissing,
            message: "no BEGIN marker".into(),
        };
        assert_eq!(err.code(), "marker_missing");
        assert_eq!(err.next_action(), Some(NextAction::HaltSchemaInvalidTerminal));
    }

    #[test]
    fn runtime_errors_have_no_forced_action() {
        let err = DispatchError::RunNotInitialized { run_id: "r1".into() };
        assert_eq!(err.code(), "run_not_initialized");
        assert!(err.next_action().is_none());
    }

    #[test]
    fn wrapped_errors_delegate_codes() {
        let err = DispatchError::Ledger(LedgerError::ParseFailed {
            path: "tasks.md".into(),
            message: "no task headings".into(),
        });
        assert_eq!(err.code(), "progress_ledger_parse_failed");
    }
}
