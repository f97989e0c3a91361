//! Prompt compilation and staged compaction.
//!
//! A compiled prompt has three regions: a static guide (hashed as the
//! stable prefix, cacheable across calls), a delta packet of scalar facts,
//! and the task body plus optional session-fact context. When the estimate
//! exceeds the role budget, compaction walks three ordered stages, each
//! accepted only if it does not grow the token count versus the prior
//! best. There is no silent truncation past stage C: overflow is terminal
//! and the task must be split upstream.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use helm_core::facts::Fact;
use helm_core::hash::{sha256_hex, sha256_short};
use helm_core::text::{collapse_whitespace, truncate_with_suffix};
use helm_core::tokens::estimate_tokens;
use helm_settings::types::DispatchSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, Result};
use crate::types::DispatchRole;

// ── configuration ──

/// Token-budget knobs for prompt compilation.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Input-token ceiling for implementer prompts.
    pub implementer_input_cap: u32,
    /// Input-token ceiling for reviewer prompts.
    pub reviewer_input_cap: u32,
    /// Characters per estimated token.
    pub chars_per_token: u32,
}

impl CompilerConfig {
    /// Pull the budget knobs out of settings.
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            implementer_input_cap: settings.implementer_input_cap,
            reviewer_input_cap: settings.reviewer_input_cap,
            chars_per_token: settings.chars_per_token,
        }
    }

    /// Input-token ceiling for a role.
    pub fn role_cap(&self, role: DispatchRole) -> u32 {
        match role {
            DispatchRole::Implementer => self.implementer_input_cap,
            DispatchRole::Reviewer => self.reviewer_input_cap,
        }
    }
}

/// `roleCap − min(roleCap−1, max(1, maxOutputTokens))`. Always ≥ 1.
pub fn prompt_budget(role_cap: u32, max_output_tokens: u32) -> u32 {
    let reserved = max_output_tokens.max(1).min(role_cap.saturating_sub(1));
    role_cap - reserved
}

// ── guide modes ──

/// Static-guide variant sent with a prompt.
///
/// The first compile in a run gets the full guide; repeats get the
/// compact one, trading a larger first prompt for smaller repeated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideMode {
    /// Complete role instructions and contract walkthrough.
    Full,
    /// Short reminder referencing the earlier full guide.
    Compact,
}

impl GuideMode {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideMode::Full => "full",
            GuideMode::Compact => "compact",
        }
    }
}

const CONTRACT_REMINDER: &str = "Your final output must be exactly one block framed by \
BEGIN_DISPATCH_RESULT and END_DISPATCH_RESULT containing a single JSON object. \
No prose before the opening marker or after the closing one.";

fn guide_text(role: DispatchRole, mode: GuideMode) -> String {
    match (role, mode) {
        (DispatchRole::Implementer, GuideMode::Full) => format!(
            "You are the implementer agent. Complete the task below, changing only what the \
             task requires, and run the relevant tests.\n{CONTRACT_REMINDER}\nThe JSON object \
             must carry: task_id, status (completed|blocked|failed), summary, files_changed, \
             tests (command/passed pairs), follow_up_actions."
        ),
        (DispatchRole::Reviewer, GuideMode::Full) => format!(
            "You are the reviewer agent. Assess the implementer's work against the task below. \
             Report concrete issues with file locations where possible.\n{CONTRACT_REMINDER}\n\
             The JSON object must carry: task_id, assessment (approved|needs_changes|blocked), \
             issues (severity/message/file), required_fixes."
        ),
        (role, GuideMode::Compact) => format!(
            "Role: {role}. Same contract as before: one \
             BEGIN_DISPATCH_RESULT/END_DISPATCH_RESULT block, one JSON object, role schema \
             unchanged."
        ),
    }
}

// ── compaction ──

/// Ordered prompt-size-reduction strategies, applied only when over budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStage {
    /// Restrict the delta packet to the allow-list and clip values.
    Prune,
    /// Replace the task prompt with a structured head/tail digest.
    Digest,
    /// Collapse everything into a single paragraph.
    Emergency,
}

impl CompactionStage {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStage::Prune => "prune",
            CompactionStage::Digest => "digest",
            CompactionStage::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempted stage, accepted or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageDecision {
    /// Which stage was attempted.
    pub stage: CompactionStage,
    /// Best token estimate before the stage ran.
    pub before_tokens: u32,
    /// Token estimate of the stage's candidate.
    pub after_tokens: u32,
    /// Whether the candidate was kept (it never grows the count).
    pub accepted: bool,
}

/// Summary of a compaction pass that actually ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionOutcome {
    /// Deepest accepted stage.
    pub stage: CompactionStage,
    /// Initial, pre-compaction token estimate.
    pub before_tokens: u32,
    /// Final token estimate.
    pub after_tokens: u32,
    /// Every stage attempted, in order.
    pub decisions: Vec<StageDecision>,
}

/// Delta-packet keys that survive stage A. Anything `stalled`-prefixed
/// also survives.
const PACKET_ALLOW_LIST: &[&str] = &[
    "task_id",
    "guide_mode",
    "guide_cache_key",
    "ledger_summary",
    "ledger_assessment",
    "ledger_issue_count",
    "replan_hint",
];

const PACKET_VALUE_CLIP: usize = 240;

static CRITICAL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(must|required|do not|never|task[ _-]?id|branch|contract|json)\b|BEGIN_DISPATCH_RESULT|END_DISPATCH_RESULT",
    )
    .expect("critical-line pattern is valid")
});

fn prune_packet(packet: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut pruned: BTreeMap<String, String> = packet
        .iter()
        .filter(|(key, _)| {
            PACKET_ALLOW_LIST.contains(&key.as_str()) || key.starts_with("stalled")
        })
        .map(|(key, value)| {
            (
                key.clone(),
                truncate_with_suffix(value, PACKET_VALUE_CLIP, "…"),
            )
        })
        .collect();
    let _ = pruned.insert("compaction_applied".into(), "true".into());
    pruned
}

fn critical_lines(prompt: &str, limit: usize) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for line in prompt.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if CRITICAL_LINE_RE.is_match(line) && !seen.contains(&line) {
            seen.push(line);
            if seen.len() == limit {
                break;
            }
        }
    }
    seen
}

/// Stage B body: head/tail excerpt plus constraint and context lines.
fn digest_prompt(prompt: &str, compaction_context: &[String]) -> String {
    const HEAD_LINES: usize = 18;
    const TAIL_LINES: usize = 8;
    const CONSTRAINT_LIMIT: usize = 16;
    const CONTEXT_LIMIT: usize = 8;
    const OBJECTIVE_CLIP: usize = 900;

    let lines: Vec<&str> = prompt
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut out = String::new();
    out.push_str("OBJECTIVE: ");
    out.push_str(&truncate_with_suffix(
        &collapse_whitespace(prompt),
        OBJECTIVE_CLIP,
        "…",
    ));
    out.push_str("\nKEY LINES:\n");
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        for line in &lines {
            out.push_str(line);
            out.push('\n');
        }
    } else {
        for line in &lines[..HEAD_LINES] {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("...\n");
        for line in &lines[lines.len() - TAIL_LINES..] {
            out.push_str(line);
            out.push('\n');
        }
    }

    let constraints = critical_lines(prompt, CONSTRAINT_LIMIT);
    if !constraints.is_empty() {
        out.push_str("CONSTRAINTS:\n");
        for line in constraints {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
    }
    if !compaction_context.is_empty() {
        out.push_str("CONTEXT:\n");
        for line in compaction_context.iter().take(CONTEXT_LIMIT) {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

/// Stage C body: one paragraph, override message first when present.
fn emergency_prompt(
    prompt: &str,
    compaction_context: &[String],
    override_message: Option<&str>,
) -> String {
    const OBJECTIVE_CLIP: usize = 420;
    const CONSTRAINT_LIMIT: usize = 8;
    const CONTEXT_LIMIT: usize = 4;

    let mut parts: Vec<String> = Vec::new();
    if let Some(message) = override_message {
        parts.push(message.to_string());
    }
    parts.push(format!(
        "OBJECTIVE: {}",
        truncate_with_suffix(&collapse_whitespace(prompt), OBJECTIVE_CLIP, "…")
    ));
    let constraints = critical_lines(prompt, CONSTRAINT_LIMIT);
    if !constraints.is_empty() {
        parts.push(format!("CONSTRAINTS: {}", constraints.join("; ")));
    }
    if !compaction_context.is_empty() {
        let context: Vec<&str> = compaction_context
            .iter()
            .take(CONTEXT_LIMIT)
            .map(String::as_str)
            .collect();
        parts.push(format!("CONTEXT: {}", context.join("; ")));
    }
    parts.join(" | ")
}

// ── compilation ──

/// Everything [`compile`] needs for one prompt.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    /// Agent the prompt targets.
    pub role: DispatchRole,
    /// Bound task id, stamped into the delta packet.
    pub task_id: &'a str,
    /// Ledger-derived task prompt.
    pub task_prompt: &'a str,
    /// Scalar facts for the dispatch header.
    pub delta_packet: BTreeMap<String, String>,
    /// Retrieved session facts rendered as context lines.
    pub session_facts: &'a [Fact],
    /// Guide variant to render.
    pub guide_mode: GuideMode,
    /// Output-token reservation, subtracted from the role cap.
    pub max_output_tokens: u32,
    /// Caller-supplied lines kept through stage B/C digests.
    pub compaction_context: &'a [String],
    /// Message prepended by the stage-C digest.
    pub override_message: Option<&'a str>,
}

/// A compiled prompt, rebuilt on every `compile_prompt` call.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledDispatchPrompt {
    /// Final prompt text.
    pub prompt: String,
    /// Hash of the static guide region.
    pub stable_prefix_hash: String,
    /// Hash of the full prompt text.
    pub full_prompt_hash: String,
    /// Delta packet actually rendered (post-prune when stage A applied).
    pub delta_packet: BTreeMap<String, String>,
    /// Output reservation the budget was computed from.
    pub max_output_tokens: u32,
    /// Guide variant rendered.
    pub guide_mode: GuideMode,
    /// Cache key for the guide region.
    pub guide_cache_key: String,
    /// Estimated prompt tokens; never exceeds the role budget.
    pub prompt_tokens: u32,
    /// Present only when the initial estimate exceeded the budget.
    pub compaction: Option<CompactionOutcome>,
}

fn render(
    guide: &str,
    packet: &BTreeMap<String, String>,
    task_body: &str,
    context_lines: &[String],
) -> String {
    let mut out = String::with_capacity(guide.len() + task_body.len() + 256);
    out.push_str(guide);
    out.push_str("\n\n== DISPATCH ==\n");
    for (key, value) in packet {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push_str("\n== TASK ==\n");
    out.push_str(task_body);
    if !context_lines.is_empty() {
        out.push_str("\n\n== CONTEXT ==\n");
        for line in context_lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

/// Compile a dispatch prompt, compacting as needed to fit the role budget.
pub fn compile(request: &CompileRequest<'_>, config: &CompilerConfig) -> Result<CompiledDispatchPrompt> {
    let role_cap = config.role_cap(request.role);
    let budget = prompt_budget(role_cap, request.max_output_tokens);

    let guide = guide_text(request.role, request.guide_mode);
    let guide_cache_key = sha256_short(&format!("{}:{}", request.guide_mode.as_str(), guide));

    let mut packet = request.delta_packet.clone();
    let _ = packet.insert("task_id".into(), request.task_id.to_string());
    let _ = packet.insert("guide_mode".into(), request.guide_mode.as_str().into());
    let _ = packet.insert("guide_cache_key".into(), guide_cache_key.clone());

    let context_lines: Vec<String> = request
        .session_facts
        .iter()
        .map(|fact| format!("- {}: {}", fact.key, fact.value))
        .collect();

    let mut best_prompt = render(&guide, &packet, request.task_prompt, &context_lines);
    let mut best_tokens = estimate_tokens(&best_prompt, config.chars_per_token);
    let mut best_packet = packet.clone();
    let before_tokens = best_tokens;

    let mut compaction = None;
    if best_tokens > budget {
        let mut decisions: Vec<StageDecision> = Vec::with_capacity(3);
        let mut applied_stage = None;
        let pruned = prune_packet(&packet);

        let candidates: [(CompactionStage, String, &BTreeMap<String, String>); 3] = [
            (
                CompactionStage::Prune,
                render(&guide, &pruned, request.task_prompt, &context_lines),
                &pruned,
            ),
            (
                CompactionStage::Digest,
                render(
                    &guide,
                    &pruned,
                    &digest_prompt(request.task_prompt, request.compaction_context),
                    &[],
                ),
                &pruned,
            ),
            (
                CompactionStage::Emergency,
                render(
                    &guide,
                    &pruned,
                    &emergency_prompt(
                        request.task_prompt,
                        request.compaction_context,
                        request.override_message,
                    ),
                    &[],
                ),
                &pruned,
            ),
        ];

        for (stage, candidate, candidate_packet) in candidates {
            let candidate_tokens = estimate_tokens(&candidate, config.chars_per_token);
            let accepted = candidate_tokens <= best_tokens;
            decisions.push(StageDecision {
                stage,
                before_tokens: best_tokens,
                after_tokens: candidate_tokens,
                accepted,
            });
            if accepted {
                best_prompt = candidate;
                best_tokens = candidate_tokens;
                best_packet = candidate_packet.clone();
                applied_stage = Some(stage);
            }
            if best_tokens <= budget {
                break;
            }
        }

        if best_tokens > budget {
            return Err(DispatchError::PromptOverflowTerminal {
                role: request.role.as_str().to_string(),
                prompt_tokens: best_tokens,
                budget,
            });
        }
        compaction = Some(CompactionOutcome {
            stage: applied_stage.unwrap_or(CompactionStage::Prune),
            before_tokens,
            after_tokens: best_tokens,
            decisions,
        });
    }

    Ok(CompiledDispatchPrompt {
        stable_prefix_hash: sha256_hex(&guide),
        full_prompt_hash: sha256_hex(&best_prompt),
        prompt: best_prompt,
        delta_packet: best_packet,
        max_output_tokens: request.max_output_tokens,
        guide_mode: request.guide_mode,
        guide_cache_key,
        prompt_tokens: best_tokens,
        compaction,
    })
}

// ────────────────────────────────────────────────────────────────────────────
