//! Typed event payloads, one struct per [`EventType`].

use helm_core::facts::Fact;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::EventType;
use super::snapshot::RunStatus;

/// Payload for `STATE_DELTA` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDeltaPayload {
    /// Why the delta was emitted (`init_run`, `ledger_rebuilt`, …).
    pub reason: String,
    /// New goal string, when the delta (re)binds the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Facts merged into the snapshot.
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// New run status, if the delta changes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// New source fingerprint after a ledger rebuild.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
}

/// Payload for `LLM_REQUEST` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmRequestPayload {
    /// Dispatch role the prompt targets.
    pub role: String,
    /// Hash of the full compiled prompt.
    pub full_prompt_hash: String,
    /// Estimated prompt tokens.
    pub prompt_tokens: u32,
    /// Guide mode used (`full` or `compact`).
    pub guide_mode: String,
}

/// Payload for `LLM_RESPONSE` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponsePayload {
    /// Dispatch role that produced the output.
    pub role: String,
    /// Estimated output tokens.
    pub output_tokens: u32,
    /// Result status or assessment string.
    pub outcome: String,
}

/// Payload for `BUDGET_DECISION` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDecisionPayload {
    /// Dispatch role being compiled.
    pub role: String,
    /// Compaction stage (`prune`, `digest`, or `emergency`).
    pub stage: String,
    /// Token estimate before the stage ran.
    pub before_tokens: u32,
    /// Token estimate after the stage ran.
    pub after_tokens: u32,
    /// Whether the stage result was kept.
    pub accepted: bool,
}

/// Payload for `INTERCEPTOR_DECISION` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptorDecisionPayload {
    /// Interceptor identifier.
    pub interceptor: String,
    /// Decision (`allow` or `deny`).
    pub decision: String,
    /// Optional reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `ERROR` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable error code (e.g. `marker_missing`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Typed view over an envelope payload.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedPayload {
    /// `STATE_DELTA`.
    StateDelta(StateDeltaPayload),
    /// `LLM_REQUEST`.
    LlmRequest(LlmRequestPayload),
    /// `LLM_RESPONSE`.
    LlmResponse(LlmResponsePayload),
    /// `BUDGET_DECISION`.
    BudgetDecision(BudgetDecisionPayload),
    /// `INTERCEPTOR_DECISION`.
    InterceptorDecision(InterceptorDecisionPayload),
    /// `ERROR`.
    Error(ErrorPayload),
}

impl TypedPayload {
    /// Deserialize a raw payload for the given event type.
    pub fn from_value(event_type: EventType, payload: &Value) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            EventType::StateDelta => Self::StateDelta(serde_json::from_value(payload.clone())?),
            EventType::LlmRequest => Self::LlmRequest(serde_json::from_value(payload.clone())?),
            EventType::LlmResponse => Self::LlmResponse(serde_json::from_value(payload.clone())?),
            EventType::BudgetDecision => {
                Self::BudgetDecision(serde_json::from_value(payload.clone())?)
            }
            EventType::InterceptorDecision => {
                Self::InterceptorDecision(serde_json::from_value(payload.clone())?)
            }
            EventType::Error => Self::Error(serde_json::from_value(payload.clone())?),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
