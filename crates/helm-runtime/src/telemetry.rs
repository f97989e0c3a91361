//! Running dispatch telemetry.
//!
//! Counters accumulate for the life of the process and are only read
//! through [`TelemetryAggregator::snapshot`], which deep-copies the maps
//! so callers can never observe a partially-updated view. The same
//! figures are mirrored to the `metrics` facade for external exporters.

use std::collections::BTreeMap;

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;

use crate::compiler::CompactionStage;

#[derive(Debug, Default)]
struct Counters {
    dispatch_count: u64,
    total_output_tokens: u64,
    approval_loop_count: u64,

    compaction_count: u64,
    compaction_auto_count: u64,
    compaction_before_tokens: u64,
    compaction_after_tokens: u64,
    compaction_stage_distribution: BTreeMap<String, u64>,
    overflow_terminal_count: u64,

    ledger_rebuild_count: u64,
    baseline_prompt_tokens: u64,
    actual_prompt_tokens: u64,

    schema_error_counts: BTreeMap<String, u64>,
    schema_version_usage: BTreeMap<String, u64>,
}

/// Immutable, deep-copied view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Outputs successfully ingested.
    pub dispatch_count: u64,
    /// Sum of estimated output tokens across dispatches.
    pub total_output_tokens: u64,
    /// `total_output_tokens / dispatch_count`; 0 with no dispatches.
    pub average_output_tokens: f64,
    /// Reviewer `needs_changes` occurrences.
    pub approval_loop_count: u64,

    /// Compaction passes that ran.
    pub compaction_count: u64,
    /// Passes triggered by the budget rather than a caller.
    pub compaction_auto_count: u64,
    /// Sum of pre-compaction token estimates.
    pub compaction_before_tokens: u64,
    /// Sum of post-compaction token estimates.
    pub compaction_after_tokens: u64,
    /// Running after/before ratio across all compactions; 1.0 when none ran.
    pub compaction_ratio: f64,
    /// Deepest-accepted-stage name → count.
    pub compaction_stage_distribution: BTreeMap<String, u64>,
    /// Prompts that overflowed even stage C.
    pub overflow_terminal_count: u64,

    /// Stale-ledger re-extractions.
    pub ledger_rebuild_count: u64,
    /// Task-prompt token sum before rebuilds.
    pub baseline_prompt_tokens: u64,
    /// Task-prompt token sum after rebuilds.
    pub actual_prompt_tokens: u64,
    /// `baseline − actual`.
    pub prompt_token_delta: i64,

    /// Error-code → count for schema and contract failures.
    pub schema_error_counts: BTreeMap<String, u64>,
    /// `name@vN` → assertion count from the schema registry.
    pub schema_version_usage: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    inner: Mutex<Counters>,
}

impl TelemetryAggregator {
    /// Aggregator with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// One output was successfully ingested.
    pub fn record_dispatch(&self, output_tokens: u32) {
        let mut inner = self.inner.lock();
        inner.dispatch_count += 1;
        inner.total_output_tokens += u64::from(output_tokens);
        counter!("helm_dispatch_total").increment(1);
        counter!("helm_dispatch_output_tokens_total").increment(u64::from(output_tokens));
    }

    /// A reviewer came back with `needs_changes`.
    pub fn record_approval_loop(&self) {
        self.inner.lock().approval_loop_count += 1;
        counter!("helm_approval_loops_total").increment(1);
    }

    /// A compaction pass completed with `stage` as its deepest accepted stage.
    pub fn record_compaction(
        &self,
        stage: CompactionStage,
        before_tokens: u32,
        after_tokens: u32,
        auto: bool,
    ) {
        let mut inner = self.inner.lock();
        inner.compaction_count += 1;
        if auto {
            inner.compaction_auto_count += 1;
        }
        inner.compaction_before_tokens += u64::from(before_tokens);
        inner.compaction_after_tokens += u64::from(after_tokens);
        *inner
            .compaction_stage_distribution
            .entry(stage.as_str().to_string())
            .or_insert(0) += 1;
        counter!("helm_compaction_total", "stage" => stage.as_str()).increment(1);
    }

    /// A prompt overflowed even the stage-C digest.
    pub fn record_overflow_terminal(&self) {
        self.inner.lock().overflow_terminal_count += 1;
        counter!("helm_compaction_overflow_terminal_total").increment(1);
    }

    /// A stale progress ledger was re-extracted; token figures compare the
    /// task prompt before and after the rebuild.
    pub fn record_ledger_rebuild(&self, baseline_tokens: u32, actual_tokens: u32) {
        let mut inner = self.inner.lock();
        inner.ledger_rebuild_count += 1;
        inner.baseline_prompt_tokens += u64::from(baseline_tokens);
        inner.actual_prompt_tokens += u64::from(actual_tokens);
        counter!("helm_ledger_rebuilds_total").increment(1);
    }

    /// A schema or contract failure occurred.
    pub fn record_schema_error(&self, code: &str) {
        let mut inner = self.inner.lock();
        *inner
            .schema_error_counts
            .entry(code.to_string())
            .or_insert(0) += 1;
        counter!("helm_schema_errors_total", "code" => code.to_string()).increment(1);
    }

    /// Merge `name@vN → count` usage figures from the schema registry.
    /// Registry counts are absolute, so this replaces rather than adds.
    pub fn record_schema_usage<I>(&self, usage: I)
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut inner = self.inner.lock();
        for (key, count) in usage {
            let _ = inner.schema_version_usage.insert(key, count);
        }
    }

    /// Deep-copied view of every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let inner = self.inner.lock();
        let average_output_tokens = if inner.dispatch_count == 0 {
            0.0
        } else {
            inner.total_output_tokens as f64 / inner.dispatch_count as f64
        };
        let compaction_ratio = if inner.compaction_before_tokens == 0 {
            1.0
        } else {
            inner.compaction_after_tokens as f64 / inner.compaction_before_tokens as f64
        };
        TelemetrySnapshot {
            dispatch_count: inner.dispatch_count,
            total_output_tokens: inner.total_output_tokens,
            average_output_tokens,
            approval_loop_count: inner.approval_loop_count,
            compaction_count: inner.compaction_count,
            compaction_auto_count: inner.compaction_auto_count,
            compaction_before_tokens: inner.compaction_before_tokens,
            compaction_after_tokens: inner.compaction_after_tokens,
            compaction_ratio,
            compaction_stage_distribution: inner.compaction_stage_distribution.clone(),
            overflow_terminal_count: inner.overflow_terminal_count,
            ledger_rebuild_count: inner.ledger_rebuild_count,
            baseline_prompt_tokens: inner.baseline_prompt_tokens,
            actual_prompt_tokens: inner.actual_prompt_tokens,
            prompt_token_delta: inner.baseline_prompt_tokens as i64
                - inner.actual_prompt_tokens as i64,
            schema_error_counts: inner.schema_error_counts.clone(),
            schema_version_usage: inner.schema_version_usage.clone(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_counters_average_correctly() {
        let telemetry = TelemetryAggregator::new();
        telemetry.record_dispatch(100);
        telemetry.record_dispatch(300);
        let snap = telemetry.snapshot();
        assert_eq!(snap.dispatch_count, 2);
        assert_eq!(snap.total_output_tokens, 400);
        assert!((snap.average_output_tokens - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compaction_ratio_tracks_sums() {
        let telemetry = TelemetryAggregator::new();
        telemetry.record_compaction(CompactionStage::Digest, 1000, 250, true);
        telemetry.record_compaction(CompactionStage::Emergency, 1000, 250, true);
        let snap = telemetry.snapshot();
        assert_eq!(snap.compaction_count, 2);
        assert_eq!(snap.compaction_auto_count, 2);
        assert!((snap.compaction_ratio - 0.25).abs() < f64::EPSILON);
        assert_eq!(snap.compaction_stage_distribution.get("digest"), Some(&1));
        assert_eq!(snap.compaction_stage_distribution.get("emergency"), Some(&1));
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let telemetry = TelemetryAggregator::new();
        telemetry.record_schema_error("schema_invalid");
        let snap = telemetry.snapshot();
        telemetry.record_schema_error("schema_invalid");
        // The earlier snapshot must not have moved.
        assert_eq!(snap.schema_error_counts.get("schema_invalid"), Some(&1));
        assert_eq!(
            telemetry.snapshot().schema_error_counts.get("schema_invalid"),
            Some(&2)
        );
    }

    #[test]
    fn empty_aggregator_has_neutral_ratios() {
        let snap = TelemetryAggregator::new().snapshot();
        assert_eq!(snap.dispatch_count, 0);
        assert!((snap.average_output_tokens).abs() < f64::EPSILON);
        assert!((snap.compaction_ratio - 1.0).abs() < f64::EPSILON);
        assert_eq!(snap.prompt_token_delta, 0);
    }
}
