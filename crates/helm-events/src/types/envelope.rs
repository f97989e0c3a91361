//! The [`RuntimeEventEnvelope`] struct — the core persisted event type.
//!
//! Envelopes are stored as a flat struct with base fields at the top level
//! and a `payload` stored as opaque [`serde_json::Value`]. Typed access to
//! the payload is opt-in via [`RuntimeEventEnvelope::typed_payload`], which
//! dispatches on [`EventType`] and deserializes into the appropriate payload
//! struct.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payloads::TypedPayload;

/// Event type discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Partial state change (facts, status, fingerprints).
    StateDelta,
    /// A prompt was compiled and handed to an agent process.
    LlmRequest,
    /// Agent output was ingested and validated.
    LlmResponse,
    /// A compaction stage was applied or rejected.
    BudgetDecision,
    /// An interceptor allowed or vetoed an operation.
    InterceptorDecision,
    /// A typed runtime error was recorded.
    Error,
}

impl EventType {
    /// Registry schema name for this event type's payload.
    #[must_use]
    pub fn schema_name(self) -> &'static str {
        match self {
            Self::StateDelta => "dispatch.event.state_delta",
            Self::LlmRequest => "dispatch.event.llm_request",
            Self::LlmResponse => "dispatch.event.llm_response",
            Self::BudgetDecision => "dispatch.event.budget_decision",
            Self::InterceptorDecision => "dispatch.event.interceptor_decision",
            Self::Error => "dispatch.event.error",
        }
    }

    /// Wire string representation (matches the serde rename).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateDelta => "STATE_DELTA",
            Self::LlmRequest => "LLM_REQUEST",
            Self::LlmResponse => "LLM_RESPONSE",
            Self::BudgetDecision => "BUDGET_DECISION",
            Self::InterceptorDecision => "INTERCEPTOR_DECISION",
            Self::Error => "ERROR",
        }
    }

    /// Parse the wire string back into an [`EventType`].
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "STATE_DELTA" => Some(Self::StateDelta),
            "LLM_REQUEST" => Some(Self::LlmRequest),
            "LLM_RESPONSE" => Some(Self::LlmResponse),
            "BUDGET_DECISION" => Some(Self::BudgetDecision),
            "INTERCEPTOR_DECISION" => Some(Self::InterceptorDecision),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted runtime event.
///
/// The canonical wire format has base fields at the top level and a
/// `payload` JSON object. Sequence numbers are strictly increasing per
/// partition and are assigned by the event log at publish time — consumers
/// never see a given sequence twice for the same partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEventEnvelope {
    /// Unique event ID (UUID v7).
    pub event_id: String,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
    /// Partition key (= run ID).
    pub partition_key: String,
    /// Monotonic sequence number within the partition.
    pub sequence: i64,
    /// Run this event belongs to.
    pub run_id: String,
    /// Orchestration step that produced the event.
    pub step_id: String,
    /// Agent (role) identifier.
    pub agent_id: String,
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Payload schema version.
    pub schema_version: u32,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Event-specific data (opaque JSON).
    pub payload: Value,
    /// Causal parent event ID, when this event was derived from another.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causal_parent_event_id: Option<String>,
}

impl RuntimeEventEnvelope {
    /// Deserialize the payload into its typed form based on `event_type`.
    pub fn typed_payload(&self) -> Result<TypedPayload, serde_json::Error> {
        TypedPayload::from_value(self.event_type, &self.payload)
    }
}

/// An event awaiting publication — everything except the fields the event
/// log stamps (`event_id`, `sequence`, `schema_version`, `timestamp`).
#[derive(Clone, Debug)]
pub struct EventDraft {
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
    /// Partition key (= run ID).
    pub partition_key: String,
    /// Run this event belongs to.
    pub run_id: String,
    /// Orchestration step producing the event.
    pub step_id: String,
    /// Agent (role) identifier.
    pub agent_id: String,
    /// Event type discriminator.
    pub event_type: EventType,
    /// Event-specific data.
    pub payload: Value,
    /// Causal parent event ID.
    pub causal_parent_event_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
