//! Event → state projection.
//!
//! [`apply`] is a pure function from one validated envelope (plus the
//! previous snapshot) to a [`StateDelta`]; it has no side effects, which
//! keeps "what changed" distinct from "what accumulated" and makes full
//! replay possible. Merging and persistence happen in the caller (the
//! runtime manager) or in the [`spawn_projector`] task — a bounded-channel
//! consumer with explicit back-pressure instead of unbounded async dispatch.

use std::sync::Arc;

use helm_core::facts::Fact;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::log::EventLog;
use crate::schema::SchemaRegistry;
use crate::snapshot_store::SnapshotStore;
use crate::types::{
    AppliedOffset, RuntimeEventEnvelope, StateDelta, StateSnapshot, payloads::TypedPayload,
};

/// Project one envelope into a partial state change.
///
/// The envelope must already have passed schema assertion. The previous
/// snapshot is read-only context; the returned delta is merged one layer up.
pub fn apply(
    envelope: &RuntimeEventEnvelope,
    _previous: Option<&StateSnapshot>,
) -> Result<StateDelta> {
    let mut delta = StateDelta {
        applied_offset: Some(AppliedOffset {
            partition_key: envelope.partition_key.clone(),
            sequence: envelope.sequence,
        }),
        ..StateDelta::default()
    };

    match envelope.typed_payload().map_err(crate::errors::EventLogError::Serde)? {
        TypedPayload::StateDelta(p) => {
            delta.goal = p.goal;
            delta.status = p.status;
            delta.facts = p.facts;
            if let Some(fingerprint) = p.source_fingerprint {
                delta
                    .facts
                    .push(Fact::new("progress_ledger:fingerprint", fingerprint));
            }
        }
        TypedPayload::LlmRequest(p) => {
            delta.facts = vec![
                Fact::new("dispatch:last_prompt_hash", p.full_prompt_hash),
                Fact::new("dispatch:last_prompt_tokens", p.prompt_tokens.to_string()),
                Fact::new("dispatch:last_guide_mode", p.guide_mode),
            ];
        }
        TypedPayload::LlmResponse(p) => {
            delta.facts = vec![
                Fact::new("dispatch:last_output_tokens", p.output_tokens.to_string()),
                Fact::new(format!("dispatch:last_outcome:{}", p.role), p.outcome),
            ];
        }
        TypedPayload::BudgetDecision(p) => {
            delta.facts = vec![Fact::new(
                format!("compaction:last_stage:{}", p.role),
                format!(
                    "stage={} before={} after={} accepted={}",
                    p.stage, p.before_tokens, p.after_tokens, p.accepted
                ),
            )];
        }
        TypedPayload::InterceptorDecision(p) => {
            delta.facts = vec![Fact::new(
                format!("interceptor:{}", p.interceptor),
                p.decision,
            )];
        }
        TypedPayload::Error(p) => {
            delta.facts = vec![Fact::new("error:last", format!("{}: {}", p.code, p.message))];
        }
    }

    Ok(delta)
}

/// Merge a delta over the previous snapshot (or a fresh one) and return the
/// accumulated state.
#[must_use]
pub fn merge(previous: Option<StateSnapshot>, run_id: &str, delta: StateDelta) -> StateSnapshot {
    let mut snapshot = previous.unwrap_or_else(|| StateSnapshot::new(run_id, ""));
    delta.merge_into(&mut snapshot);
    snapshot
}

/// Rebuild a run's snapshot purely from the event log.
///
/// Every stored envelope is re-asserted against the registry and folded
/// through [`apply`]/[`merge`] in sequence order.
pub fn replay(log: &EventLog, registry: &SchemaRegistry, run_id: &str) -> Result<StateSnapshot> {
    let mut snapshot = StateSnapshot::new(run_id, "");
    for envelope in log.events_for_partition(run_id)? {
        registry.assert_envelope(&envelope)?;
        let delta = apply(&envelope, Some(&snapshot))?;
        delta.merge_into(&mut snapshot);
    }
    Ok(snapshot)
}

/// Handle to a running projector task.
pub struct ProjectorHandle {
    tx: mpsc::Sender<RuntimeEventEnvelope>,
    join: JoinHandle<()>,
}

impl ProjectorHandle {
    /// Send an envelope to the projector, waiting when the channel is full.
    pub async fn send(&self, envelope: RuntimeEventEnvelope) -> bool {
        self.tx.send(envelope).await.is_ok()
    }

    /// Close the channel and wait for the task to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.join.await;
    }
}

/// Spawn a single projector task fed by a bounded channel.
///
/// The task asserts, applies, merges, and upserts each envelope. Delivery is
/// at-least-once: envelopes whose sequence is at or below the snapshot's
/// applied offset are skipped, making redelivery harmless.
pub fn spawn_projector(
    store: Arc<dyn SnapshotStore>,
    registry: Arc<SchemaRegistry>,
    capacity: usize,
) -> ProjectorHandle {
    let (tx, mut rx) = mpsc::channel::<RuntimeEventEnvelope>(capacity);
    let join = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = project_one(store.as_ref(), &registry, &envelope) {
                metrics::counter!("helm_projector_errors_total").increment(1);
                warn!(
                    event_id = %envelope.event_id,
                    error = %e,
                    "projection failed, envelope dropped"
                );
            }
        }
        debug!("projector channel closed, task exiting");
    });
    ProjectorHandle { tx, join }
}

fn project_one(
    store: &dyn SnapshotStore,
    registry: &SchemaRegistry,
    envelope: &RuntimeEventEnvelope,
) -> Result<()> {
    registry.assert_envelope(envelope)?;
    let previous = store.get(&envelope.run_id)?;

    // Idempotency on redelivery: skip already-applied sequences.
    if let Some(ref prev) = previous {
        if prev
            .applied_offsets
            .get(&envelope.partition_key)
            .is_some_and(|&applied| applied >= envelope.sequence)
        {
            debug!(
                event_id = %envelope.event_id,
                sequence = envelope.sequence,
                "envelope already applied, skipping"
            );
            return Ok(());
        }
    }

    let delta = apply(envelope, previous.as_ref())?;
    let snapshot = merge(previous, &envelope.run_id, delta);
    store.upsert(&snapshot)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_store::MemorySnapshotStore;
    use crate::types::payloads::StateDeltaPayload;
    use crate::types::{EventDraft, EventType, RunStatus};

    fn delta_draft(run_id: &str, facts: Vec<Fact>, status: Option<RunStatus>) -> EventDraft {
        let payload = StateDeltaPayload {
            reason: "test".into(),
            goal: None,
            facts,
            status,
            source_fingerprint: None,
        };
        EventDraft {
            idempotency_key: "ik".into(),
            partition_key: run_id.into(),
            run_id: run_id.into(),
            step_id: "s".into(),
            agent_id: "implementer".into(),
            event_type: EventType::StateDelta,
            payload: serde_json::to_value(payload).unwrap(),
            causal_parent_event_id: None,
        }
    }

    #[test]
    fn apply_state_delta_carries_facts_and_offset() {
        let log = EventLog::in_memory().unwrap();
        let envelope = log
            .publish(delta_draft(
                "run-1",
                vec![Fact::new("k", "v")],
                Some(RunStatus::Blocked),
            ))
            .unwrap();
        let delta = apply(&envelope, None).unwrap();
        assert_eq!(delta.facts, vec![Fact::new("k", "v")]);
        assert_eq!(delta.status, Some(RunStatus::Blocked));
        let offset = delta.applied_offset.unwrap();
        assert_eq!(offset.partition_key, "run-1");
        assert_eq!(offset.sequence, 1);
    }

    #[test]
    fn apply_fingerprint_becomes_fact() {
        let log = EventLog::in_memory().unwrap();
        let payload = StateDeltaPayload {
            reason: "ledger_rebuilt".into(),
            goal: None,
            facts: vec![],
            status: None,
            source_fingerprint: Some("abc123".into()),
        };
        let mut draft = delta_draft("run-1", vec![], None);
        draft.payload = serde_json::to_value(payload).unwrap();
        let envelope = log.publish(draft).unwrap();
        let delta = apply(&envelope, None).unwrap();
        assert_eq!(
            delta.facts,
            vec![Fact::new("progress_ledger:fingerprint", "abc123")]
        );
    }

    #[test]
    fn replay_rebuilds_accumulated_state() {
        let log = EventLog::in_memory().unwrap();
        let registry = SchemaRegistry::with_defaults();
        let _ = log
            .publish(delta_draft("run-1", vec![Fact::new("a", "1")], None))
            .unwrap();
        let _ = log
            .publish(delta_draft(
                "run-1",
                vec![Fact::new("a", "2"), Fact::new("b", "3")],
                Some(RunStatus::Done),
            ))
            .unwrap();

        let snapshot = replay(&log, &registry, "run-1").unwrap();
        assert_eq!(snapshot.status, RunStatus::Done);
        assert_eq!(snapshot.facts.len(), 2);
        assert_eq!(snapshot.facts[0].value, "2");
        assert_eq!(snapshot.applied_offsets["run-1"], 2);
    }

    #[test]
    fn applied_offsets_non_decreasing_across_merges() {
        let log = EventLog::in_memory().unwrap();
        let mut snapshot: Option<StateSnapshot> = None;
        let mut last_offset = 0;
        for _ in 0..5 {
            let envelope = log.publish(delta_draft("run-1", vec![], None)).unwrap();
            let delta = apply(&envelope, snapshot.as_ref()).unwrap();
            let merged = merge(snapshot.take(), "run-1", delta);
            let offset = merged.applied_offsets["run-1"];
            assert!(offset >= last_offset);
            last_offset = offset;
            snapshot = Some(merged);
        }
        assert_eq!(last_offset, 5);
    }

    #[tokio::test]
    async fn projector_task_persists_snapshots() {
        let log = EventLog::in_memory().unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(SchemaRegistry::with_defaults());
        let projector = spawn_projector(Arc::clone(&store), registry, 16);

        let envelope = log
            .publish(delta_draft(
                "run-1",
                vec![Fact::new("k", "v")],
                Some(RunStatus::Running),
            ))
            .unwrap();
        assert!(projector.send(envelope).await);
        projector.shutdown().await;

        let snapshot = store.get("run-1").unwrap().unwrap();
        assert_eq!(snapshot.facts, vec![Fact::new("k", "v")]);
        assert_eq!(snapshot.applied_offsets["run-1"], 1);
    }

    #[tokio::test]
    async fn projector_task_idempotent_on_redelivery() {
        let log = EventLog::in_memory().unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(SchemaRegistry::with_defaults());
        let projector = spawn_projector(Arc::clone(&store), registry, 16);

        let envelope = log
            .publish(delta_draft("run-1", vec![Fact::new("k", "v")], None))
            .unwrap();
        // At-least-once bus: same envelope delivered twice
        assert!(projector.send(envelope.clone()).await);
        assert!(projector.send(envelope).await);
        projector.shutdown().await;

        let snapshot = store.get("run-1").unwrap().unwrap();
        assert_eq!(snapshot.facts.len(), 1);
        assert_eq!(snapshot.applied_offsets["run-1"], 1);
    }
}
