//! The flat fact vocabulary used for snapshot persistence.
//!
//! Facts are the only persisted channel for structured runtime state: the
//! task ledger, routing decisions, and compaction records all round-trip
//! through prefixed fact keys. Keys are unique within a collection — the
//! latest write wins and replaces in place, preserving original insertion
//! order.

use serde::{Deserialize, Serialize};

/// Fact key carrying the terminal contract-failure annotation.
///
/// This is the one fact a snapshot still accepts after its status turns
/// terminal: it records which contract violation ended the run.
pub const CONTRACT_FAILURE_KEY: &str = "schema_contract_failure:last";

/// A single key/value fact with a confidence score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    /// Unique key within a fact collection.
    pub key: String,
    /// Opaque string value.
    pub value: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Fact {
    /// Create a fact with full confidence.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            confidence: 1.0,
        }
    }

    /// Create a fact with an explicit confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(
        key: impl Into<String>,
        value: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Merge `incoming` facts over `existing`, in place.
///
/// Keys already present are replaced at their original position; new keys
/// are appended in their incoming order. The result never contains two
/// entries with the same key.
pub fn merge_facts(existing: &mut Vec<Fact>, incoming: Vec<Fact>) {
    for fact in incoming {
        if let Some(slot) = existing.iter_mut().find(|f| f.key == fact.key) {
            *slot = fact;
        } else {
            existing.push(fact);
        }
    }
}

/// Look up a fact value by key.
#[must_use]
pub fn fact_value<'a>(facts: &'a [Fact], key: &str) -> Option<&'a str> {
    facts
        .iter()
        .find(|f| f.key == key)
        .map(|f| f.value.as_str())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
