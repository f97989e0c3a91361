//! Shared dispatch vocabulary: roles, next actions, and the decision
//! tables that map a validated agent outcome to what happens next.

use helm_events::RunStatus;
use serde::{Deserialize, Serialize};

use crate::contract::{ImplementerStatus, ReviewerAssessment};

/// Which external agent a dispatch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchRole {
    Implementer,
    Reviewer,
}

impl DispatchRole {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchRole::Implementer => "implementer",
            DispatchRole::Reviewer => "reviewer",
        }
    }

    /// Schema name used to validate this role's delimited result payload.
    pub fn result_schema(&self) -> &'static str {
        match self {
            DispatchRole::Implementer => "dispatch.result.implementer",
            DispatchRole::Reviewer => "dispatch.result.reviewer",
        }
    }
}

impl std::fmt::Display for DispatchRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do after an ingest completes (or terminally fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Implementer finished; hand the work to the reviewer.
    DispatchReviewer,
    /// Implementer is blocked; retry with added constraints.
    RetryImplementerWithConstraints,
    /// Implementer failed; retry the dispatch.
    RetryImplementer,
    /// Reviewer approved; move on in the task list.
    AdvanceToNextTask,
    /// Reviewer wants changes; dispatch the implementer with the fixes.
    DispatchImplementerFixes,
    /// Reviewer is blocked; stop and involve a human.
    HaltAndEscalate,
    /// Contract failure; do not retry without a corrected prompt.
    HaltSchemaInvalidTerminal,
}

impl NextAction {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::DispatchReviewer => "dispatch_reviewer",
            NextAction::RetryImplementerWithConstraints => "retry_implementer_with_constraints",
            NextAction::RetryImplementer => "retry_implementer",
            NextAction::AdvanceToNextTask => "advance_to_next_task",
            NextAction::DispatchImplementerFixes => "dispatch_implementer_fixes",
            NextAction::HaltAndEscalate => "halt_and_escalate",
            NextAction::HaltSchemaInvalidTerminal => "halt_schema_invalid_terminal",
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision table for a validated implementer result.
pub fn implementer_next_action(status: ImplementerStatus) -> (NextAction, RunStatus) {
    match status {
        ImplementerStatus::Completed => (NextAction::DispatchReviewer, RunStatus::Running),
        ImplementerStatus::Blocked => {
            (NextAction::RetryImplementerWithConstraints, RunStatus::Blocked)
        }
        ImplementerStatus::Failed => (NextAction::RetryImplementer, RunStatus::Failed),
    }
}

/// Decision table for a validated reviewer result.
pub fn reviewer_next_action(assessment: ReviewerAssessment) -> (NextAction, RunStatus) {
    match assessment {
        ReviewerAssessment::Approved => (NextAction::AdvanceToNextTask, RunStatus::Done),
        ReviewerAssessment::NeedsChanges => {
            (NextAction::DispatchImplementerFixes, RunStatus::Blocked)
        }
        ReviewerAssessment::Blocked => (NextAction::HaltAndEscalate, RunStatus::Failed),
    }
}

// ────────────────────────────────────────────────────────────────────────────
