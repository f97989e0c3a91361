//! The dispatch runtime manager.
//!
//! Five actions: `init_run` binds a run to one task and seeds facts,
//! `compile_prompt` produces a budget-constrained prompt, `ingest_output`
//! validates agent output and derives the next action, `get_snapshot` and
//! `get_telemetry` are pure reads. Callers must serialize the write path
//! per run; distinct runs proceed concurrently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use helm_core::facts::{CONTRACT_FAILURE_KEY, Fact};
use helm_core::tokens::estimate_tokens;
use helm_events::types::payloads::{
    BudgetDecisionPayload, ErrorPayload, LlmRequestPayload, LlmResponsePayload, StateDeltaPayload,
};
use helm_events::{
    EventBus, EventDraft, EventLog, EventType, RunStatus, SchemaRegistry, SnapshotStore,
    StateSnapshot, apply, merge,
};
use helm_ledger::progress::{ExtractArgs, ProgressLedger, extract_progress_ledger};
use helm_ledger::task_ledger::{TaskLedger, TaskOutcome};
use helm_settings::types::HelmSettings;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::collaborators::{
    ClassifyRequest, CliOverrideResolver, FactExtractor, FactRetriever, HeuristicClassifier,
    MemoryFactStore, NoCliOverrides, ResultFactExtractor, RetrieveQuery, SessionFactStore,
    StaticRoutingTable, TaskComplexityClassifier,
};
use crate::compiler::{
    CompileRequest, CompiledDispatchPrompt, CompilerConfig, GuideMode, compile,
};
use crate::contract::{DispatchResult, extract_dispatch_result};
use crate::errors::{DispatchError, Result};
use crate::telemetry::{TelemetryAggregator, TelemetrySnapshot};
use crate::types::{
    DispatchRole, NextAction, implementer_next_action, reviewer_next_action,
};

/// File the progress ledger is extracted from, relative to the project root.
const TASK_SOURCE_FILE: &str = "tasks.md";

const MAX_SESSION_FACTS: usize = 12;
const SESSION_FACT_TOKEN_CAP: u32 = 400;

/// Manager-level configuration derived from settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Prompt-budget knobs.
    pub compiler: CompilerConfig,
    /// Output reservation used when the caller supplies none.
    pub default_max_output_tokens: u32,
    /// Non-advancing outcomes before a task gets a replan hint.
    pub stalled_threshold: u32,
}

impl RuntimeConfig {
    /// Pull the runtime knobs out of settings.
    pub fn from_settings(settings: &HelmSettings) -> Self {
        Self {
            compiler: CompilerConfig::from_settings(&settings.dispatch),
            default_max_output_tokens: settings.dispatch.default_max_output_tokens,
            stalled_threshold: settings.dispatch.stalled_threshold,
        }
    }
}

/// External services the manager delegates to.
pub struct Collaborators {
    /// Task-complexity classifier consulted at `init_run`.
    pub classifier: Arc<dyn TaskComplexityClassifier>,
    /// Provider/CLI routing table.
    pub routing: Arc<dyn crate::collaborators::RoutingTable>,
    /// Per-role CLI override resolver.
    pub cli_overrides: Arc<dyn CliOverrideResolver>,
    /// Durable session-fact store.
    pub fact_store: Arc<dyn SessionFactStore>,
    /// Result-to-facts extractor.
    pub fact_extractor: Arc<dyn FactExtractor>,
    /// Session-fact retriever for prompt context.
    pub fact_retriever: Arc<dyn FactRetriever>,
}

impl Default for Collaborators {
    fn default() -> Self {
        let facts = Arc::new(MemoryFactStore::new());
        Self {
            classifier: Arc::new(HeuristicClassifier),
            routing: Arc::new(StaticRoutingTable::default()),
            cli_overrides: Arc::new(NoCliOverrides),
            fact_store: facts.clone(),
            fact_extractor: Arc::new(ResultFactExtractor),
            fact_retriever: facts,
        }
    }
}

struct RunBinding {
    task_id: String,
    spec_name: String,
    source_path: PathBuf,
    ledger: ProgressLedger,
    guide_counts: BTreeMap<DispatchRole, u64>,
}

// ── action argument/result shapes ──

/// Arguments to [`DispatchRuntimeManager::init_run`].
#[derive(Debug, Clone)]
pub struct InitRunArgs {
    /// Run being bound.
    pub run_id: String,
    /// Spec the task belongs to.
    pub spec_name: String,
    /// The single task this run works on.
    pub task_id: String,
    /// Project root containing the task source file.
    pub project_path: PathBuf,
}

/// Arguments to [`DispatchRuntimeManager::compile_prompt`].
#[derive(Debug, Clone)]
pub struct CompilePromptArgs {
    /// Bound run.
    pub run_id: String,
    /// Role being compiled for.
    pub role: DispatchRole,
    /// Must match the run's bound task.
    pub task_id: String,
    /// Output reservation; falls back to the configured default.
    pub max_output_tokens: Option<u32>,
    /// Lines the stage B/C digests keep verbatim.
    pub compaction_context: Vec<String>,
    /// Message the stage-C digest prepends.
    pub override_message: Option<String>,
}

impl CompilePromptArgs {
    /// Args with no output cap, context, or override.
    pub fn new(
        run_id: impl Into<String>,
        role: DispatchRole,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            role,
            task_id: task_id.into(),
            max_output_tokens: None,
            compaction_context: Vec::new(),
            override_message: None,
        }
    }
}

/// Arguments to [`DispatchRuntimeManager::ingest_output`].
#[derive(Debug, Clone)]
pub struct IngestOutputArgs {
    /// Bound run.
    pub run_id: String,
    /// Role that produced the output.
    pub role: DispatchRole,
    /// Must match the run's bound task.
    pub task_id: String,
    /// Raw agent output text.
    pub output: String,
    /// Optional cap the estimated output tokens must not exceed.
    pub max_output_tokens: Option<u32>,
}

/// What a successful ingest hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The validated, typed result.
    pub result: DispatchResult,
    /// Snapshot after the result was folded in.
    pub snapshot: StateSnapshot,
    /// Table-derived next orchestration action.
    pub next_action: NextAction,
    /// Estimated tokens in the raw output.
    pub output_tokens: u32,
}

// ── the manager ──

pub struct DispatchRuntimeManager {
    log: Arc<EventLog>,
    bus: Arc<EventBus>,
    store: Arc<dyn SnapshotStore>,
    registry: Arc<SchemaRegistry>,
    telemetry: Arc<TelemetryAggregator>,
    config: RuntimeConfig,
    collaborators: Collaborators,
    runs: DashMap<String, RunBinding>,
}

impl DispatchRuntimeManager {
    /// Build a manager over an event log, snapshot store, and registry.
    pub fn new(
        log: Arc<EventLog>,
        store: Arc<dyn SnapshotStore>,
        registry: Arc<SchemaRegistry>,
        config: RuntimeConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            log,
            bus: Arc::new(EventBus::new()),
            store,
            registry,
            telemetry: Arc::new(TelemetryAggregator::new()),
            config,
            collaborators,
            runs: DashMap::new(),
        }
    }

    /// The bus every published envelope fans out on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Shared telemetry counters.
    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    fn draft(
        &self,
        run_id: &str,
        step_id: &str,
        agent_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> EventDraft {
        EventDraft {
            idempotency_key: Uuid::now_v7().to_string(),
            partition_key: run_id.to_string(),
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
            agent_id: agent_id.to_string(),
            event_type,
            payload,
            causal_parent_event_id: None,
        }
    }

    /// Publish an event, fan it out, and fold it into the stored snapshot.
    ///
    /// Read-your-writes: the projection is applied inline so the snapshot
    /// returned to callers already reflects the event, independent of the
    /// at-least-once bus consumers.
    fn publish_and_project(&self, draft: EventDraft) -> Result<StateSnapshot> {
        let envelope = self.log.publish(draft)?;
        self.registry.assert_envelope(&envelope)?;
        let _ = self.bus.publish(envelope.clone());
        let previous = self.store.get(&envelope.run_id)?;
        let delta = apply(&envelope, previous.as_ref())?;
        let snapshot = merge(previous, &envelope.run_id, delta);
        self.store.upsert(&snapshot)?;
        Ok(snapshot)
    }

    fn binding_check(&self, run_id: &str, task_id: &str) -> Result<()> {
        match self.runs.get(run_id) {
            None => Err(DispatchError::RunNotInitialized {
                run_id: run_id.to_string(),
            }),
            Some(binding) if binding.task_id != task_id => Err(DispatchError::RunTaskMismatch {
                run_id: run_id.to_string(),
                bound_task_id: binding.task_id.clone(),
                requested_task_id: task_id.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    // ── init_run ──

    /// Bind a run to a task, classify it, resolve routing, and seed facts.
    ///
    /// Re-initializing with the same task re-seeds and resets guide-mode
    /// alternation. Re-initializing with a different task is rejected with
    /// `run_task_mismatch` rather than silently rebinding.
    #[instrument(skip(self, args), fields(run_id = %args.run_id, task_id = %args.task_id))]
    pub async fn init_run(&self, args: InitRunArgs) -> Result<StateSnapshot> {
        if let Some(binding) = self.runs.get(&args.run_id) {
            if binding.task_id != args.task_id {
                return Err(DispatchError::RunTaskMismatch {
                    run_id: args.run_id.clone(),
                    bound_task_id: binding.task_id.clone(),
                    requested_task_id: args.task_id.clone(),
                });
            }
        }

        let source_path = args.project_path.join(TASK_SOURCE_FILE);
        let ledger = extract_progress_ledger(&ExtractArgs {
            spec_name: &args.spec_name,
            task_id: &args.task_id,
            source_path: &source_path,
        })?;

        let classification = self
            .collaborators
            .classifier
            .classify(ClassifyRequest {
                task_description: ledger.current_task.description.clone(),
                task_id: args.task_id.clone(),
                spec_name: args.spec_name.clone(),
            })
            .await?;

        let mut facts = vec![
            Fact::new("classification:level", classification.level.as_str()),
            Fact::with_confidence(
                "classification:confidence",
                format!("{:.2}", classification.confidence),
                classification.confidence,
            ),
            Fact::new("classification:classifier_id", &classification.classifier_id),
            Fact::new("progress_ledger:active_task", &args.task_id),
            Fact::new(
                "progress_ledger:total_tasks",
                ledger.totals.total_tasks.to_string(),
            ),
            Fact::new("progress_ledger:spec_name", &args.spec_name),
        ];
        for role in [DispatchRole::Implementer, DispatchRole::Reviewer] {
            let route = self
                .collaborators
                .routing
                .resolve(classification.level, role)
                .await?;
            let cli = self
                .collaborators
                .cli_overrides
                .resolve(role, classification.level)
                .unwrap_or(route.cli);
            facts.push(Fact::new(format!("routing:{role}:provider"), route.provider));
            facts.push(Fact::new(format!("routing:{role}:cli"), cli));
        }

        let payload = StateDeltaPayload {
            reason: "init_run".into(),
            goal: Some(format!("{} / {}", args.spec_name, args.task_id)),
            facts,
            status: Some(RunStatus::Running),
            source_fingerprint: Some(ledger.source_fingerprint.as_string()),
        };
        let snapshot = self.publish_and_project(self.draft(
            &args.run_id,
            "init_run",
            "runtime",
            EventType::StateDelta,
            serde_json::to_value(payload).map_err(helm_events::EventLogError::Serde)?,
        ))?;

        let _ = self.runs.insert(
            args.run_id.clone(),
            RunBinding {
                task_id: args.task_id,
                spec_name: args.spec_name,
                source_path,
                ledger,
                guide_counts: BTreeMap::new(),
            },
        );
        Ok(snapshot)
    }

    // ── compile_prompt ──

    /// Compile a prompt for one role, rebuilding the ledger if the source
    /// document changed and compacting to fit the role budget.
    #[instrument(skip(self, args), fields(run_id = %args.run_id, role = %args.role))]
    pub async fn compile_prompt(&self, args: CompilePromptArgs) -> Result<CompiledDispatchPrompt> {
        self.binding_check(&args.run_id, &args.task_id)?;

        // All binding access is synchronous so the shard guard never lives
        // across an await.
        let (task_prompt, task_description, guide_mode) = {
            let mut binding = self
                .runs
                .get_mut(&args.run_id)
                .ok_or_else(|| DispatchError::RunNotInitialized {
                    run_id: args.run_id.clone(),
                })?;

            if binding.ledger.is_stale() {
                self.rebuild_ledger(&args.run_id, &mut binding)?;
            }
            binding.ledger.assert_complete()?;
            let build = binding.ledger.build_task_prompt();
            let description = binding.ledger.current_task.description.clone();

            let count = binding.guide_counts.entry(args.role).or_insert(0);
            let mode = if *count == 0 {
                GuideMode::Full
            } else {
                GuideMode::Compact
            };
            *count += 1;
            (build.prompt, description, mode)
        };

        let snapshot = self
            .store
            .get(&args.run_id)?
            .unwrap_or_else(|| StateSnapshot::new(&args.run_id, ""));
        let task_ledger =
            TaskLedger::from_facts(&snapshot.facts, &args.task_id, self.config.stalled_threshold);

        let mut delta_packet = BTreeMap::new();
        if let Some(summary) = &task_ledger.last_summary {
            let _ = delta_packet.insert("ledger_summary".into(), summary.clone());
        }
        if let Some(assessment) = &task_ledger.reviewer_assessment {
            let _ = delta_packet.insert("ledger_assessment".into(), assessment.clone());
        }
        if let Some(count) = task_ledger.reviewer_issue_count {
            let _ = delta_packet.insert("ledger_issue_count".into(), count.to_string());
        }
        let _ = delta_packet.insert("stalled_count".into(), task_ledger.stalled_count.to_string());
        if task_ledger.replan_hint {
            let _ = delta_packet.insert("replan_hint".into(), "true".into());
        }

        let session_facts = self
            .collaborators
            .fact_retriever
            .retrieve(RetrieveQuery {
                task_description,
                task_id: args.task_id.clone(),
                max_facts: MAX_SESSION_FACTS,
                max_tokens: SESSION_FACT_TOKEN_CAP,
                chars_per_token: self.config.compiler.chars_per_token,
            })
            .await?;

        let max_output_tokens = args
            .max_output_tokens
            .unwrap_or(self.config.default_max_output_tokens);
        let request = CompileRequest {
            role: args.role,
            task_id: &args.task_id,
            task_prompt: &task_prompt,
            delta_packet,
            session_facts: &session_facts,
            guide_mode,
            max_output_tokens,
            compaction_context: &args.compaction_context,
            override_message: args.override_message.as_deref(),
        };

        let compiled = match compile(&request, &self.config.compiler) {
            Ok(compiled) => compiled,
            Err(err @ DispatchError::PromptOverflowTerminal { .. }) => {
                self.telemetry.record_overflow_terminal();
                self.record_error_event(&args.run_id, "compile_prompt", args.role, &err);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let request_payload = LlmRequestPayload {
            role: args.role.as_str().into(),
            full_prompt_hash: compiled.full_prompt_hash.clone(),
            prompt_tokens: compiled.prompt_tokens,
            guide_mode: compiled.guide_mode.as_str().into(),
        };
        let _ = self.publish_and_project(self.draft(
            &args.run_id,
            "compile_prompt",
            args.role.as_str(),
            EventType::LlmRequest,
            serde_json::to_value(request_payload).map_err(helm_events::EventLogError::Serde)?,
        ))?;

        if let Some(outcome) = &compiled.compaction {
            for decision in outcome.decisions.iter().filter(|d| d.accepted) {
                let payload = BudgetDecisionPayload {
                    role: args.role.as_str().into(),
                    stage: decision.stage.as_str().into(),
                    before_tokens: decision.before_tokens,
                    after_tokens: decision.after_tokens,
                    accepted: decision.accepted,
                };
                let _ = self.publish_and_project(self.draft(
                    &args.run_id,
                    "compile_prompt",
                    args.role.as_str(),
                    EventType::BudgetDecision,
                    serde_json::to_value(payload).map_err(helm_events::EventLogError::Serde)?,
                ))?;
            }
            let compacted_fact = Fact::new(
                format!("dispatch_compacted:{}", args.role),
                format!(
                    "stage={} before={} after={}",
                    outcome.stage, outcome.before_tokens, outcome.after_tokens
                ),
            );
            let payload = StateDeltaPayload {
                reason: "prompt_compacted".into(),
                goal: None,
                facts: vec![compacted_fact],
                status: None,
                source_fingerprint: None,
            };
            let _ = self.publish_and_project(self.draft(
                &args.run_id,
                "compile_prompt",
                args.role.as_str(),
                EventType::StateDelta,
                serde_json::to_value(payload).map_err(helm_events::EventLogError::Serde)?,
            ))?;
            self.telemetry.record_compaction(
                outcome.stage,
                outcome.before_tokens,
                outcome.after_tokens,
                true,
            );
        }
        Ok(compiled)
    }

    /// Re-extract the progress ledger after a source change.
    fn rebuild_ledger(
        &self,
        run_id: &str,
        binding: &mut RunBinding,
    ) -> Result<()> {
        let chars_per_token = self.config.compiler.chars_per_token;
        let baseline =
            estimate_tokens(&binding.ledger.build_task_prompt().prompt, chars_per_token);
        let rebuilt = extract_progress_ledger(&ExtractArgs {
            spec_name: &binding.spec_name,
            task_id: &binding.task_id,
            source_path: &binding.source_path,
        })?;
        let actual = estimate_tokens(&rebuilt.build_task_prompt().prompt, chars_per_token);
        self.telemetry.record_ledger_rebuild(baseline, actual);

        let payload = StateDeltaPayload {
            reason: "ledger_rebuilt".into(),
            goal: None,
            facts: vec![Fact::new(
                "progress_ledger:total_tasks",
                rebuilt.totals.total_tasks.to_string(),
            )],
            status: None,
            source_fingerprint: Some(rebuilt.source_fingerprint.as_string()),
        };
        let _ = self.publish_and_project(self.draft(
            run_id,
            "compile_prompt",
            "runtime",
            EventType::StateDelta,
            serde_json::to_value(payload).map_err(helm_events::EventLogError::Serde)?,
        ))?;

        binding.ledger = rebuilt;
        Ok(())
    }

    // ── ingest_output ──

    /// Validate agent output and derive the next orchestration action.
    #[instrument(skip(self, args), fields(run_id = %args.run_id, role = %args.role))]
    pub async fn ingest_output(&self, args: IngestOutputArgs) -> Result<IngestOutcome> {
        self.binding_check(&args.run_id, &args.task_id)?;

        let result = match extract_dispatch_result(args.role, &args.output, &self.registry) {
            Ok(result) => result,
            Err(err) => {
                self.record_terminal_contract_failure(&args.run_id, args.role, &err);
                return Err(err);
            }
        };
        if result.task_id() != args.task_id {
            let err = DispatchError::Contract {
                kind: crate::errors::ContractViolation::SchemaInvalid,
                message: format!(
                    "result names task {} but the run is bound to {}",
                    result.task_id(),
                    args.task_id
                ),
            };
            self.record_terminal_contract_failure(&args.run_id, args.role, &err);
            return Err(err);
        }

        let output_tokens =
            estimate_tokens(&args.output, self.config.compiler.chars_per_token);
        if let Some(cap) = args.max_output_tokens {
            if output_tokens > cap {
                self.telemetry.record_schema_error("output_token_budget_exceeded");
                return Err(DispatchError::OutputTokenBudgetExceeded {
                    output_tokens,
                    max_output_tokens: cap,
                });
            }
        }

        let extracted = match &result {
            DispatchResult::Implementer(r) => self
                .collaborators
                .fact_extractor
                .extract_from_implementer(r, &args.task_id),
            DispatchResult::Reviewer(r) => self
                .collaborators
                .fact_extractor
                .extract_from_reviewer(r, &args.task_id),
        };
        self.collaborators.fact_store.add(extracted.clone()).await?;

        let previous = self
            .store
            .get(&args.run_id)?
            .unwrap_or_else(|| StateSnapshot::new(&args.run_id, ""));
        let mut task_ledger =
            TaskLedger::from_facts(&previous.facts, &args.task_id, self.config.stalled_threshold);
        let outcome = match &result {
            DispatchResult::Implementer(r) => TaskOutcome::Implementer {
                status: r.status.as_str().into(),
                summary: r.summary.clone(),
            },
            DispatchResult::Reviewer(r) => TaskOutcome::Reviewer {
                assessment: r.assessment.as_str().into(),
                summary: r.summary.clone(),
                issue_count: r.issues.len() as u32,
            },
        };
        task_ledger.apply_outcome(&outcome);

        let (next_action, status) = match &result {
            DispatchResult::Implementer(r) => implementer_next_action(r.status),
            DispatchResult::Reviewer(r) => reviewer_next_action(r.assessment),
        };

        self.telemetry.record_dispatch(output_tokens);
        if next_action == NextAction::DispatchImplementerFixes {
            self.telemetry.record_approval_loop();
        }

        let response_payload = LlmResponsePayload {
            role: args.role.as_str().into(),
            output_tokens,
            outcome: result.outcome().into(),
        };
        let _ = self.publish_and_project(self.draft(
            &args.run_id,
            "ingest_output",
            args.role.as_str(),
            EventType::LlmResponse,
            serde_json::to_value(response_payload).map_err(helm_events::EventLogError::Serde)?,
        ))?;

        let mut facts = extracted;
        facts.extend(task_ledger.to_facts());
        let delta_payload = StateDeltaPayload {
            reason: "ingest_output".into(),
            goal: None,
            facts,
            status: Some(status),
            source_fingerprint: None,
        };
        let snapshot = self.publish_and_project(self.draft(
            &args.run_id,
            "ingest_output",
            args.role.as_str(),
            EventType::StateDelta,
            serde_json::to_value(delta_payload).map_err(helm_events::EventLogError::Serde)?,
        ))?;

        Ok(IngestOutcome {
            result,
            snapshot,
            next_action,
            output_tokens,
        })
    }

    /// Stamp the terminal-failure fact and flip the run to `failed`.
    ///
    /// Best-effort: the original contract error is what the caller gets,
    /// even if recording the failure itself fails.
    fn record_terminal_contract_failure(
        &self,
        run_id: &str,
        role: DispatchRole,
        err: &DispatchError,
    ) {
        self.telemetry.record_schema_error(err.code());
        self.record_error_event(run_id, "ingest_output", role, err);

        let payload = StateDeltaPayload {
            reason: "contract_failure".into(),
            goal: None,
            facts: vec![Fact::new(
                CONTRACT_FAILURE_KEY,
                format!("{}: {err}", err.code()),
            )],
            status: Some(RunStatus::Failed),
            source_fingerprint: None,
        };
        match serde_json::to_value(payload) {
            Ok(value) => {
                if let Err(publish_err) = self.publish_and_project(self.draft(
                    run_id,
                    "ingest_output",
                    role.as_str(),
                    EventType::StateDelta,
                    value,
                )) {
                    warn!(%run_id, error = %publish_err, "failed to record contract failure");
                }
            }
            Err(serde_err) => warn!(%run_id, error = %serde_err, "failed to encode contract failure"),
        }
    }

    fn record_error_event(
        &self,
        run_id: &str,
        step_id: &str,
        role: DispatchRole,
        err: &DispatchError,
    ) {
        let payload = ErrorPayload {
            code: err.code().into(),
            message: err.to_string(),
        };
        match serde_json::to_value(payload) {
            Ok(value) => {
                if let Err(publish_err) = self.publish_and_project(self.draft(
                    run_id,
                    step_id,
                    role.as_str(),
                    EventType::Error,
                    value,
                )) {
                    warn!(%run_id, error = %publish_err, "failed to record error event");
                }
            }
            Err(serde_err) => warn!(%run_id, error = %serde_err, "failed to encode error event"),
        }
    }

    // ── reads ──

    /// Read the stored snapshot for a run, if any.
    pub fn get_snapshot(&self, run_id: &str) -> Result<Option<StateSnapshot>> {
        Ok(self.store.get(run_id)?)
    }

    /// Immutable telemetry view, with registry usage folded in.
    pub fn get_telemetry(&self) -> TelemetrySnapshot {
        self.telemetry
            .record_schema_usage(self.registry.usage_counts());
        self.telemetry.snapshot()
    }
}

// ────────────────────────────────────────────────────────────────────────────
