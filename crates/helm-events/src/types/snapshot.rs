//! Snapshot and delta types — the projected state of a run.

use std::collections::BTreeMap;

use helm_core::facts::{CONTRACT_FAILURE_KEY, Fact, merge_facts};
use serde::{Deserialize, Serialize};

/// Run lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Actively dispatching.
    Running,
    /// Waiting on a corrective re-dispatch.
    Blocked,
    /// Task approved and complete.
    Done,
    /// Terminal failure.
    Failed,
}

impl RunStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Wire string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded side-effect request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// Output channel identifier.
    pub channel: String,
    /// Task the write belongs to.
    pub task_id: String,
    /// Opaque value to write.
    pub value: String,
}

/// Remaining input/output token budget for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudget {
    /// Remaining input tokens.
    pub remaining_input: u32,
    /// Remaining output tokens.
    pub remaining_output: u32,
}

/// The durable, projected state of a run.
///
/// INVARIANT: `facts` never contains two entries with the same key — merging
/// replaces in place. Immutable once `status` reaches done/failed, except
/// for the terminal-failure annotation path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Run identifier.
    pub run_id: String,
    /// Opaque goal string.
    pub goal: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Ordered facts with unique keys.
    pub facts: Vec<Fact>,
    /// Recorded side-effect requests.
    pub pending_writes: Vec<PendingWrite>,
    /// Remaining token budget.
    pub token_budget: TokenBudget,
    /// Last applied sequence number per partition key.
    pub applied_offsets: BTreeMap<String, i64>,
}

impl StateSnapshot {
    /// Create an empty snapshot for a freshly initialized run.
    #[must_use]
    pub fn new(run_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            status: RunStatus::Running,
            facts: Vec::new(),
            pending_writes: Vec::new(),
            token_budget: TokenBudget::default(),
            applied_offsets: BTreeMap::new(),
        }
    }
}

/// The applied-offset update carried by a delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOffset {
    /// Partition the triggering event belongs to.
    pub partition_key: String,
    /// Sequence number of the triggering event.
    pub sequence: i64,
}

/// A partial state change produced by projecting one event.
///
/// "What changed" stays distinct from "what accumulated" — the runtime
/// manager merges a delta against the stored snapshot and re-upserts,
/// which keeps the projector pure and replayable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    /// New goal, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// New status, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Facts to merge over existing facts.
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// Pending writes to append.
    #[serde(default)]
    pub pending_writes: Vec<PendingWrite>,
    /// New token budget, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<TokenBudget>,
    /// Applied-offset update from the triggering event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_offset: Option<AppliedOffset>,
}

impl StateDelta {
    /// Merge this delta into `snapshot`, consuming the delta.
    ///
    /// Applied offsets are monotonic: an offset lower than the recorded one
    /// for the same partition is ignored (idempotent on redelivery).
    ///
    /// A snapshot whose status is terminal no longer accepts deltas, with
    /// one exception: the terminal-failure annotation (a `Failed` status
    /// carrying [`CONTRACT_FAILURE_KEY`]). Late events against a finished
    /// run are dropped here rather than at every call site, which also
    /// keeps replay convergent when post-terminal events exist in the log.
    pub fn merge_into(self, snapshot: &mut StateSnapshot) {
        if snapshot.status.is_terminal() && !self.is_terminal_annotation() {
            return;
        }
        if let Some(goal) = self.goal {
            snapshot.goal = goal;
        }
        if let Some(status) = self.status {
            snapshot.status = status;
        }
        merge_facts(&mut snapshot.facts, self.facts);
        snapshot.pending_writes.extend(self.pending_writes);
        if let Some(budget) = self.token_budget {
            snapshot.token_budget = budget;
        }
        if let Some(offset) = self.applied_offset {
            let entry = snapshot
                .applied_offsets
                .entry(offset.partition_key)
                .or_insert(offset.sequence);
            if offset.sequence > *entry {
                *entry = offset.sequence;
            }
        }
    }

    fn is_terminal_annotation(&self) -> bool {
        self.status == Some(RunStatus::Failed)
            && self.facts.iter().any(|f| f.key == CONTRACT_FAILURE_KEY)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
