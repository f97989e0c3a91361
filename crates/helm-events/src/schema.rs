//! Schema registry: `(schema name, version)` → validation predicate.
//!
//! Every inbound envelope's payload is asserted before being trusted. The
//! registry also hosts the dispatch-result contract schemas
//! (`dispatch.result.implementer`, `dispatch.result.reviewer`) so the whole
//! wire surface shares one versioned validation path.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::{EventLogError, Result};
use crate::types::{EventType, RuntimeEventEnvelope, payloads::TypedPayload};

/// A validation predicate: returns `Err(reason)` when the payload is rejected.
pub type SchemaPredicate = Box<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Versioned schema registry with per-schema usage counts.
pub struct SchemaRegistry {
    schemas: HashMap<(String, u32), SchemaPredicate>,
    usage: Mutex<HashMap<String, u64>>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Registry pre-loaded with v1 validators for all event payloads and the
    /// two dispatch-result contract schemas.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for event_type in [
            EventType::StateDelta,
            EventType::LlmRequest,
            EventType::LlmResponse,
            EventType::BudgetDecision,
            EventType::InterceptorDecision,
            EventType::Error,
        ] {
            registry.register(
                event_type.schema_name(),
                1,
                Box::new(move |payload| {
                    if !payload.is_object() {
                        return Err("payload must be a JSON object".into());
                    }
                    TypedPayload::from_value(event_type, payload)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }),
            );
        }
        registry.register(
            "dispatch.result.implementer",
            1,
            Box::new(|payload| validate_result_object(payload, "status", &IMPLEMENTER_FIELDS)),
        );
        registry.register(
            "dispatch.result.reviewer",
            1,
            Box::new(|payload| validate_result_object(payload, "assessment", &REVIEWER_FIELDS)),
        );
        registry
    }

    /// Register (or replace) a predicate for `(name, version)`.
    pub fn register(&mut self, name: &str, version: u32, predicate: SchemaPredicate) {
        let _ = self.schemas.insert((name.to_string(), version), predicate);
    }

    /// Assert `payload` against the named schema version.
    ///
    /// Bumps the usage count for the schema on every call, accepted or not.
    pub fn assert_valid(&self, name: &str, version: u32, payload: &Value) -> Result<()> {
        {
            let mut usage = self.usage.lock();
            *usage.entry(format!("{name}@v{version}")).or_insert(0) += 1;
        }
        let predicate = self.schemas.get(&(name.to_string(), version)).ok_or_else(|| {
            EventLogError::UnknownSchema {
                schema: name.to_string(),
                version,
            }
        })?;
        predicate(payload).map_err(|message| EventLogError::SchemaViolation {
            schema: name.to_string(),
            version,
            message,
        })
    }

    /// Assert a full envelope: base shape plus payload schema.
    pub fn assert_envelope(&self, envelope: &RuntimeEventEnvelope) -> Result<()> {
        if envelope.event_id.is_empty() || envelope.partition_key.is_empty() {
            return Err(EventLogError::SchemaViolation {
                schema: envelope.event_type.schema_name().to_string(),
                version: envelope.schema_version,
                message: "envelope missing event_id or partition_key".into(),
            });
        }
        if envelope.sequence < 1 {
            return Err(EventLogError::SchemaViolation {
                schema: envelope.event_type.schema_name().to_string(),
                version: envelope.schema_version,
                message: format!("sequence must be >= 1, got {}", envelope.sequence),
            });
        }
        self.assert_valid(
            envelope.event_type.schema_name(),
            envelope.schema_version,
            &envelope.payload,
        )
    }

    /// Snapshot of per-schema usage counts (`name@vN` → count).
    pub fn usage_counts(&self) -> HashMap<String, u64> {
        self.usage.lock().clone()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Required fields and their expected JSON kinds for a result schema.
type FieldSpec = (&'static str, fn(&Value) -> bool);

const IMPLEMENTER_FIELDS: [FieldSpec; 5] = [
    ("task_id", Value::is_string),
    ("summary", Value::is_string),
    ("files_changed", Value::is_array),
    ("tests", Value::is_array),
    ("follow_up_actions", Value::is_array),
];

const REVIEWER_FIELDS: [FieldSpec; 3] = [
    ("task_id", Value::is_string),
    ("issues", Value::is_array),
    ("required_fixes", Value::is_array),
];

fn validate_result_object(
    payload: &Value,
    discriminator: &str,
    fields: &[FieldSpec],
) -> std::result::Result<(), String> {
    let obj = payload
        .as_object()
        .ok_or_else(|| "result must be a JSON object".to_string())?;
    if !obj.get(discriminator).is_some_and(Value::is_string) {
        return Err(format!("missing or non-string field: {discriminator}"));
    }
    for (name, check) in fields {
        match obj.get(*name) {
            Some(value) if check(value) => {}
            Some(_) => return Err(format!("field has wrong type: {name}")),
            None => return Err(format!("missing required field: {name}")),
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_registry_validates_state_delta() {
        let registry = SchemaRegistry::with_defaults();
        let payload = serde_json::json!({"reason": "seed", "facts": []});
        registry
            .assert_valid("dispatch.event.state_delta", 1, &payload)
            .unwrap();
    }

    #[test]
    fn rejects_non_object_payload() {
        let registry = SchemaRegistry::with_defaults();
        let err = registry
            .assert_valid("dispatch.event.state_delta", 1, &serde_json::json!(42))
            .unwrap_err();
        assert_matches!(err, EventLogError::SchemaViolation { .. });
        assert_eq!(err.code(), "schema_invalid");
    }

    #[test]
    fn unknown_schema_version_rejected() {
        let registry = SchemaRegistry::with_defaults();
        let err = registry
            .assert_valid("dispatch.event.state_delta", 99, &serde_json::json!({}))
            .unwrap_err();
        assert_matches!(err, EventLogError::UnknownSchema { version: 99, .. });
    }

    #[test]
    fn implementer_result_schema_accepts_valid() {
        let registry = SchemaRegistry::with_defaults();
        let payload = serde_json::json!({
            "task_id": "T-1",
            "status": "completed",
            "summary": "done",
            "files_changed": ["src/lib.rs"],
            "tests": [{"command": "cargo test", "passed": true}],
            "follow_up_actions": []
        });
        registry
            .assert_valid("dispatch.result.implementer", 1, &payload)
            .unwrap();
    }

    #[test]
    fn implementer_result_schema_rejects_missing_field() {
        let registry = SchemaRegistry::with_defaults();
        let payload = serde_json::json!({
            "task_id": "T-1",
            "status": "completed",
            "summary": "done"
        });
        let err = registry
            .assert_valid("dispatch.result.implementer", 1, &payload)
            .unwrap_err();
        assert_matches!(err, EventLogError::SchemaViolation { message, .. } => {
            assert!(message.contains("files_changed"));
        });
    }

    #[test]
    fn reviewer_result_schema_rejects_wrong_type() {
        let registry = SchemaRegistry::with_defaults();
        let payload = serde_json::json!({
            "task_id": "T-1",
            "assessment": "approved",
            "issues": "not-an-array",
            "required_fixes": []
        });
        let err = registry
            .assert_valid("dispatch.result.reviewer", 1, &payload)
            .unwrap_err();
        assert_matches!(err, EventLogError::SchemaViolation { message, .. } => {
            assert!(message.contains("issues"));
        });
    }

    #[test]
    fn usage_counts_accumulate() {
        let registry = SchemaRegistry::with_defaults();
        let payload = serde_json::json!({"reason": "x"});
        let _ = registry.assert_valid("dispatch.event.state_delta", 1, &payload);
        let _ = registry.assert_valid("dispatch.event.state_delta", 1, &payload);
        let counts = registry.usage_counts();
        assert_eq!(counts["dispatch.event.state_delta@v1"], 2);
    }

    #[test]
    fn envelope_assertion_checks_base_fields() {
        let registry = SchemaRegistry::with_defaults();
        let envelope = RuntimeEventEnvelope {
            event_id: String::new(),
            idempotency_key: "ik".into(),
            partition_key: "run-1".into(),
            sequence: 1,
            run_id: "run-1".into(),
            step_id: "s".into(),
            agent_id: "implementer".into(),
            event_type: EventType::StateDelta,
            schema_version: 1,
            timestamp: "t".into(),
            payload: serde_json::json!({"reason": "x"}),
            causal_parent_event_id: None,
        };
        assert!(registry.assert_envelope(&envelope).is_err());
    }
}
