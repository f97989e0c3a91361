//! Delimited output contract: extraction and validation of agent results.
//!
//! Agents return free-form text with exactly one JSON document fenced by
//! `BEGIN_DISPATCH_RESULT` / `END_DISPATCH_RESULT`. Extraction is strict:
//! after trimming, the text must start on the opening marker and end on
//! the closing one, each appearing exactly once. Anything else is a
//! terminal contract violation.

use helm_events::{EventLogError, SchemaRegistry};
use serde::{Deserialize, Serialize};

use crate::errors::{ContractViolation, DispatchError, Result};
use crate::types::DispatchRole;

/// Opening delimiter of the result block.
pub const BEGIN_MARKER: &str = "BEGIN_DISPATCH_RESULT";
/// Closing delimiter of the result block.
pub const END_MARKER: &str = "END_DISPATCH_RESULT";

/// Version of the result schemas registered in [`SchemaRegistry`].
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Implementer self-reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementerStatus {
    /// Work finished and tests ran.
    Completed,
    /// Progress is impossible without outside help.
    Blocked,
    /// The attempt failed.
    Failed,
}

impl ImplementerStatus {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImplementerStatus::Completed => "completed",
            ImplementerStatus::Blocked => "blocked",
            ImplementerStatus::Failed => "failed",
        }
    }
}

/// Reviewer verdict on the implementer's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerAssessment {
    /// Work is acceptable as-is.
    Approved,
    /// Specific fixes are required before approval.
    NeedsChanges,
    /// Review could not be completed.
    Blocked,
}

impl ReviewerAssessment {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewerAssessment::Approved => "approved",
            ReviewerAssessment::NeedsChanges => "needs_changes",
            ReviewerAssessment::Blocked => "blocked",
        }
    }
}

/// One test invocation reported by the implementer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Command that was run.
    pub command: String,
    /// Whether it passed.
    pub passed: bool,
}

/// One issue raised by the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Reviewer-assigned severity (free-form, e.g. `major`).
    pub severity: String,
    /// What is wrong.
    pub message: String,
    /// File the issue concerns, when identifiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// The implementer's delimited result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementerResult {
    /// Task the result concerns; must match the run's bound task.
    pub task_id: String,
    /// Self-reported outcome.
    pub status: ImplementerStatus,
    /// What was done.
    pub summary: String,
    /// Paths touched. Required; an idle turn reports an empty array.
    pub files_changed: Vec<String>,
    /// Tests run this turn. Required; empty when none ran.
    pub tests: Vec<TestRecord>,
    /// Suggested follow-up work. Required; empty when there is none.
    pub follow_up_actions: Vec<String>,
}

/// The reviewer's delimited result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerResult {
    /// Task the review concerns; must match the run's bound task.
    pub task_id: String,
    /// Verdict.
    pub assessment: ReviewerAssessment,
    /// Optional prose summary of the review.
    #[serde(default)]
    pub summary: String,
    /// Issues found. Required; an approval reports an empty array.
    pub issues: Vec<ReviewIssue>,
    /// Concrete fixes the implementer must make. Required; may be empty.
    pub required_fixes: Vec<String>,
}

/// A validated result, typed by the role that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Implementer(ImplementerResult),
    Reviewer(ReviewerResult),
}

impl DispatchResult {
    /// Task the result names.
    pub fn task_id(&self) -> &str {
        match self {
            DispatchResult::Implementer(r) => &r.task_id,
            DispatchResult::Reviewer(r) => &r.task_id,
        }
    }

    /// Role that produced this result.
    pub fn role(&self) -> DispatchRole {
        match self {
            DispatchResult::Implementer(_) => DispatchRole::Implementer,
            DispatchResult::Reviewer(_) => DispatchRole::Reviewer,
        }
    }

    /// The outcome discriminant as a wire string (`completed`, `approved`, ...).
    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchResult::Implementer(r) => r.status.as_str(),
            DispatchResult::Reviewer(r) => r.assessment.as_str(),
        }
    }
}

fn contract_err(kind: ContractViolation, message: impl Into<String>) -> DispatchError {
    DispatchError::Contract {
        kind,
        message: message.into(),
    }
}

/// Pull the JSON body out of the delimiters, enforcing the strict framing
/// rules. Returns the raw body text, untrimmed JSON included.
fn extract_body(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    let begin_count = trimmed.matches(BEGIN_MARKER).count();
    let end_count = trimmed.matches(END_MARKER).count();
    // END_DISPATCH_RESULT contains no overlap with BEGIN_, but BEGIN count
    // via substring search also matches nothing inside END. Counts must be
    // exactly one each.
    if begin_count != 1 || end_count != 1 {
        return Err(contract_err(
            ContractViolation::MarkerMissing,
            format!(
                "expected exactly one {BEGIN_MARKER}/{END_MARKER} pair \
                 (found {begin_count} begin, {end_count} end)"
            ),
        ));
    }
    if !trimmed.starts_with(BEGIN_MARKER) {
        return Err(contract_err(
            ContractViolation::MarkerMissing,
            "text before the opening marker",
        ));
    }
    if !trimmed.ends_with(END_MARKER) {
        return Err(contract_err(
            ContractViolation::MarkerMissing,
            "text after the closing marker",
        ));
    }
    let inner = &trimmed[BEGIN_MARKER.len()..trimmed.len() - END_MARKER.len()];
    if inner
        .find(END_MARKER)
        .is_some_and(|at| at + END_MARKER.len() != inner.len())
    {
        // Unreachable given the counts above, kept as a guard.
        return Err(contract_err(
            ContractViolation::MarkerMissing,
            "closing marker is not final",
        ));
    }
    Ok(inner)
}

/// Extract and validate the delimited result for `role`.
///
/// Validation runs in two passes: the registry predicate (which is also
/// what the event pipeline uses) and a typed deserialization. Both map to
/// `schema_invalid` on failure.
pub fn extract_dispatch_result(
    role: DispatchRole,
    raw: &str,
    registry: &SchemaRegistry,
) -> Result<DispatchResult> {
    let body = extract_body(raw)?;
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| contract_err(ContractViolation::JsonParseFailed, err.to_string()))?;

    registry
        .assert_valid(role.result_schema(), RESULT_SCHEMA_VERSION, &value)
        .map_err(|err| match err {
            EventLogError::SchemaViolation { message, .. } => {
                contract_err(ContractViolation::SchemaInvalid, message)
            }
            other => DispatchError::Events(other),
        })?;

    let result = match role {
        DispatchRole::Implementer => serde_json::from_value::<ImplementerResult>(value)
            .map(DispatchResult::Implementer),
        DispatchRole::Reviewer => {
            serde_json::from_value::<ReviewerResult>(value).map(DispatchResult::Reviewer)
        }
    }
    .map_err(|err| contract_err(ContractViolation::SchemaInvalid, err.to_string()))?;

    Ok(result)
}

// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_defaults()
    }

    fn wrap(body: &str) -> String {
        format!("{BEGIN_MARKER}\n{body}\n{END_MARKER}")
    }

    const IMPL_OK: &str = r#"{
        "task_id": "T-1",
        "status": "completed",
        "summary": "added the parser",
        "files_changed": ["src/parse.rs"],
        "tests": [{"command": "cargo test -p parser", "passed": true}],
        "follow_up_actions": []
    }"#;

    // ── framing ──

    #[test]
    fn accepts_surrounding_whitespace_only() {
        let raw = format!("\n\n  {}  \n", wrap(IMPL_OK));
        let result = extract_dispatch_result(DispatchRole::Implementer, &raw, &registry());
        assert_matches!(result, Ok(DispatchResult::Implementer(r)) => {
            assert_eq!(r.task_id, "T-1");
            assert_eq!(r.status, ImplementerStatus::Completed);
        });
    }

    #[test]
    fn rejects_prose_before_the_opening_marker() {
        let raw = format!("Sure, here is the result:\n{}", wrap(IMPL_OK));
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "marker_missing");
    }

    #[test]
    fn rejects_trailing_prose_after_the_closing_marker() {
        let raw = format!("{}\nLet me know if anything else is needed.", wrap(IMPL_OK));
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "marker_missing");
    }

    #[test]
    fn rejects_duplicated_markers() {
        let raw = format!("{}\n{}", wrap(IMPL_OK), wrap(IMPL_OK));
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "marker_missing");
    }

    #[test]
    fn rejects_missing_end_marker() {
        let raw = format!("{BEGIN_MARKER}\n{IMPL_OK}");
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "marker_missing");
    }

    // ── parsing and schema ──

    #[test]
    fn rejects_malformed_json() {
        let raw = wrap("{\"task_id\": \"T-1\", \"status\": ");
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "json_parse_failed");
    }

    #[test]
    fn rejects_unknown_status_value() {
        let raw = wrap(
            r#"{"task_id": "T-1", "status": "done", "summary": "x",
                "files_changed": [], "tests": [], "follow_up_actions": []}"#,
        );
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "schema_invalid");
    }

    #[test]
    fn rejects_wrong_role_payload() {
        let raw = wrap(r#"{"task_id": "T-1", "assessment": "approved", "summary": "x"}"#);
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "schema_invalid");
    }

    #[test]
    fn rejects_implementer_payload_missing_the_arrays() {
        // The shape is fixed: an idle turn still reports empty arrays.
        let raw = wrap(r#"{"task_id": "T-2", "status": "blocked", "summary": "need creds"}"#);
        let err =
            extract_dispatch_result(DispatchRole::Implementer, &raw, &registry()).unwrap_err();
        assert_eq!(err.code(), "schema_invalid");
        assert_matches!(
            &err,
            DispatchError::Contract { message, .. } if message.contains("files_changed")
        );
    }

    #[test]
    fn reviewer_result_parses_with_issues() {
        let body = r#"{
            "task_id": "T-3",
            "assessment": "needs_changes",
            "summary": "close, two fixes needed",
            "issues": [{"severity": "major", "message": "missing bounds check", "file": "src/buf.rs"}],
            "required_fixes": ["add bounds check"]
        }"#;
        let result =
            extract_dispatch_result(DispatchRole::Reviewer, &wrap(body), &registry()).unwrap();
        assert_matches!(result, DispatchResult::Reviewer(r) => {
            assert_eq!(r.assessment, ReviewerAssessment::NeedsChanges);
            assert_eq!(r.issues.len(), 1);
            assert_eq!(r.issues[0].file.as_deref(), Some("src/buf.rs"));
            assert_eq!(r.required_fixes.len(), 1);
        });
    }

    #[test]
    fn contract_errors_force_terminal_halt() {
        let err =
            extract_dispatch_result(DispatchRole::Reviewer, "no markers at all", &registry())
                .unwrap_err();
        assert_eq!(
            err.next_action(),
            Some(crate::types::NextAction::HaltSchemaInvalidTerminal)
        );
    }
}
