//! Per-(run, task) outcome ledger with stall detection.
//!
//! The ledger round-trips through the snapshot's flat fact list under
//! `task_ledger:<task_id>:<field>` keys, since facts are the only persisted
//! channel. Internal code decodes into this typed struct immediately after
//! snapshot load rather than re-parsing strings at every access site.

use helm_core::facts::{Fact, fact_value};
use helm_core::text::collapse_whitespace;
use serde::{Deserialize, Serialize};

/// A validated outcome ingested for a task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// Implementer finished a dispatch turn.
    Implementer {
        /// Result status (`completed`, `blocked`, `failed`).
        status: String,
        /// Implementer summary.
        summary: String,
    },
    /// Reviewer finished a dispatch turn.
    Reviewer {
        /// Assessment (`approved`, `needs_changes`, `blocked`).
        assessment: String,
        /// Condensed issue text.
        summary: String,
        /// Number of reported issues.
        issue_count: u32,
    },
}

impl TaskOutcome {
    /// Signature used for non-advancement comparison: status/assessment plus
    /// whitespace-collapsed summary.
    #[must_use]
    pub fn signature(&self) -> String {
        match self {
            Self::Implementer { status, summary } => {
                format!("implementer|{status}|{}", collapse_whitespace(summary))
            }
            Self::Reviewer {
                assessment,
                summary,
                ..
            } => format!("reviewer|{assessment}|{}", collapse_whitespace(summary)),
        }
    }
}

/// Per-task outcome state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLedger {
    /// Task this ledger tracks.
    pub task_id: String,
    /// Consecutive non-advancing outcomes observed.
    pub stalled_count: u32,
    /// Threshold at which `replan_hint` is set.
    pub stalled_threshold: u32,
    /// Summary from the most recent outcome.
    pub last_summary: Option<String>,
    /// Most recent reviewer assessment.
    pub reviewer_assessment: Option<String>,
    /// Most recent reviewer issue count.
    pub reviewer_issue_count: Option<u32>,
    /// Set when the task has stalled past the threshold.
    pub replan_hint: bool,
    /// Signature of the previous outcome, for stall comparison.
    pub last_signature: Option<String>,
}

impl TaskLedger {
    /// Fresh ledger for a task.
    #[must_use]
    pub fn new(task_id: impl Into<String>, stalled_threshold: u32) -> Self {
        Self {
            task_id: task_id.into(),
            stalled_count: 0,
            stalled_threshold,
            last_summary: None,
            reviewer_assessment: None,
            reviewer_issue_count: None,
            replan_hint: false,
            last_signature: None,
        }
    }

    /// Apply a validated outcome.
    ///
    /// The stalled count increments when the outcome signature repeats the
    /// stored one (no forward progress) and resets on any change. Reaching
    /// the threshold sets `replan_hint`; forward progress clears it.
    pub fn apply_outcome(&mut self, outcome: &TaskOutcome) {
        let signature = outcome.signature();
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            self.stalled_count += 1;
        } else {
            self.stalled_count = 0;
            self.replan_hint = false;
        }
        if self.stalled_count >= self.stalled_threshold {
            self.replan_hint = true;
        }
        self.last_signature = Some(signature);

        match outcome {
            TaskOutcome::Implementer { summary, .. } => {
                self.last_summary = Some(summary.clone());
            }
            TaskOutcome::Reviewer {
                assessment,
                summary,
                issue_count,
            } => {
                self.last_summary = Some(summary.clone());
                self.reviewer_assessment = Some(assessment.clone());
                self.reviewer_issue_count = Some(*issue_count);
            }
        }
    }

    fn key(&self, field: &str) -> String {
        format!("task_ledger:{}:{field}", self.task_id)
    }

    /// Encode this ledger as prefixed snapshot facts.
    #[must_use]
    pub fn to_facts(&self) -> Vec<Fact> {
        let mut facts = vec![
            Fact::new(self.key("stalled_count"), self.stalled_count.to_string()),
            Fact::new(
                self.key("stalled_threshold"),
                self.stalled_threshold.to_string(),
            ),
            Fact::new(self.key("replan_hint"), self.replan_hint.to_string()),
        ];
        if let Some(ref summary) = self.last_summary {
            facts.push(Fact::new(self.key("last_summary"), summary.clone()));
        }
        if let Some(ref assessment) = self.reviewer_assessment {
            facts.push(Fact::new(self.key("reviewer_assessment"), assessment.clone()));
        }
        if let Some(count) = self.reviewer_issue_count {
            facts.push(Fact::new(
                self.key("reviewer_issue_count"),
                count.to_string(),
            ));
        }
        if let Some(ref signature) = self.last_signature {
            facts.push(Fact::new(self.key("last_signature"), signature.clone()));
        }
        facts
    }

    /// Decode a ledger from snapshot facts, falling back to defaults for
    /// absent fields.
    #[must_use]
    pub fn from_facts(facts: &[Fact], task_id: &str, default_threshold: u32) -> Self {
        let prefix = format!("task_ledger:{task_id}:");
        let get = |field: &str| fact_value(facts, &format!("{prefix}{field}"));

        Self {
            task_id: task_id.to_string(),
            stalled_count: get("stalled_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            stalled_threshold: get("stalled_threshold")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_threshold),
            last_summary: get("last_summary").map(str::to_owned),
            reviewer_assessment: get("reviewer_assessment").map(str::to_owned),
            reviewer_issue_count: get("reviewer_issue_count").and_then(|v| v.parse().ok()),
            replan_hint: get("replan_hint").is_some_and(|v| v == "true"),
            last_signature: get("last_signature").map(str::to_owned),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn implementer(status: &str, summary: &str) -> TaskOutcome {
        TaskOutcome::Implementer {
            status: status.into(),
            summary: summary.into(),
        }
    }

    fn reviewer(assessment: &str, summary: &str, issues: u32) -> TaskOutcome {
        TaskOutcome::Reviewer {
            assessment: assessment.into(),
            summary: summary.into(),
            issue_count: issues,
        }
    }

    #[test]
    fn first_outcome_never_counts_as_stall() {
        let mut ledger = TaskLedger::new("T-1", 3);
        ledger.apply_outcome(&implementer("blocked", "stuck on imports"));
        assert_eq!(ledger.stalled_count, 0);
        assert!(!ledger.replan_hint);
    }

    #[test]
    fn repeated_signature_increments_stall() {
        let mut ledger = TaskLedger::new("T-1", 3);
        for _ in 0..3 {
            ledger.apply_outcome(&implementer("blocked", "stuck on imports"));
        }
        assert_eq!(ledger.stalled_count, 2);
        assert!(!ledger.replan_hint);
        // Fourth identical outcome crosses the threshold
        ledger.apply_outcome(&implementer("blocked", "stuck on imports"));
        assert_eq!(ledger.stalled_count, 3);
        assert!(ledger.replan_hint);
    }

    #[test]
    fn progress_resets_stall_and_hint() {
        let mut ledger = TaskLedger::new("T-1", 1);
        ledger.apply_outcome(&implementer("blocked", "stuck"));
        ledger.apply_outcome(&implementer("blocked", "stuck"));
        assert!(ledger.replan_hint);

        ledger.apply_outcome(&implementer("completed", "moved past the import issue"));
        assert_eq!(ledger.stalled_count, 0);
        assert!(!ledger.replan_hint);
    }

    #[test]
    fn whitespace_differences_do_not_advance() {
        let mut ledger = TaskLedger::new("T-1", 3);
        ledger.apply_outcome(&implementer("blocked", "stuck  on\nimports"));
        ledger.apply_outcome(&implementer("blocked", "stuck on imports"));
        assert_eq!(ledger.stalled_count, 1);
    }

    #[test]
    fn reviewer_outcome_records_assessment_fields() {
        let mut ledger = TaskLedger::new("T-1", 3);
        ledger.apply_outcome(&reviewer("needs_changes", "two style issues", 2));
        assert_eq!(ledger.reviewer_assessment.as_deref(), Some("needs_changes"));
        assert_eq!(ledger.reviewer_issue_count, Some(2));
        assert_eq!(ledger.last_summary.as_deref(), Some("two style issues"));
    }

    #[test]
    fn role_switch_counts_as_progress() {
        let mut ledger = TaskLedger::new("T-1", 3);
        ledger.apply_outcome(&implementer("completed", "done"));
        ledger.apply_outcome(&reviewer("needs_changes", "done", 1));
        assert_eq!(ledger.stalled_count, 0);
    }

    // ── facts round-trip ─────────────────────────────────────────────────

    #[test]
    fn facts_round_trip_preserves_all_fields() {
        let mut ledger = TaskLedger::new("T-1", 5);
        ledger.apply_outcome(&reviewer("needs_changes", "issues found", 2));
        ledger.apply_outcome(&reviewer("needs_changes", "issues found", 2));

        let facts = ledger.to_facts();
        let decoded = TaskLedger::from_facts(&facts, "T-1", 3);
        assert_eq!(decoded, ledger);
    }

    #[test]
    fn from_facts_empty_uses_defaults() {
        let ledger = TaskLedger::from_facts(&[], "T-9", 3);
        assert_eq!(ledger, TaskLedger::new("T-9", 3));
    }

    #[test]
    fn facts_are_namespaced_per_task() {
        let mut a = TaskLedger::new("T-1", 3);
        a.apply_outcome(&implementer("completed", "a done"));
        let mut facts = a.to_facts();
        let mut b = TaskLedger::new("T-2", 3);
        b.apply_outcome(&implementer("failed", "b failed"));
        facts.extend(b.to_facts());

        let a2 = TaskLedger::from_facts(&facts, "T-1", 3);
        let b2 = TaskLedger::from_facts(&facts, "T-2", 3);
        assert_eq!(a2.last_summary.as_deref(), Some("a done"));
        assert_eq!(b2.last_summary.as_deref(), Some("b failed"));
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_ledgers(
            stalled_count in 0u32..100,
            threshold in 1u32..10,
            summary in ".{0,80}",
            issues in proptest::option::of(0u32..50),
        ) {
            let ledger = TaskLedger {
                task_id: "T-p".into(),
                stalled_count,
                stalled_threshold: threshold,
                last_summary: Some(summary.clone()),
                reviewer_assessment: Some("approved".into()),
                reviewer_issue_count: issues,
                replan_hint: stalled_count >= threshold,
                last_signature: Some(format!("implementer|completed|{summary}")),
            };
            let decoded = TaskLedger::from_facts(&ledger.to_facts(), "T-p", 3);
            prop_assert_eq!(decoded, ledger);
        }
    }
}
