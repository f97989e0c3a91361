//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON wire
//! format. Each type implements [`Default`] with production default values.
//! `#[serde(default)]` allows partial JSON — missing fields get their default
//! value during deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the Helm dispatch runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Dispatch runtime settings (budgets, compaction, stall detection).
    pub dispatch: DispatchSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "helm".to_string(),
            dispatch: DispatchSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Dispatch runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Input-token ceiling for implementer prompts.
    pub implementer_input_cap: u32,
    /// Input-token ceiling for reviewer prompts.
    pub reviewer_input_cap: u32,
    /// Chars-per-token divisor for all token estimates.
    pub chars_per_token: u32,
    /// Output-token budget applied when the caller supplies none.
    pub default_max_output_tokens: u32,
    /// Consecutive non-advancing outcomes before `replan_hint` is set.
    pub stalled_threshold: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            implementer_input_cap: 4800,
            reviewer_input_cap: 4000,
            chars_per_token: 4,
            default_max_output_tokens: 1200,
            stalled_threshold: 3,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_role_caps() {
        let s = HelmSettings::default();
        assert_eq!(s.dispatch.implementer_input_cap, 4800);
        assert_eq!(s.dispatch.reviewer_input_cap, 4000);
        assert_eq!(s.dispatch.chars_per_token, 4);
        assert_eq!(s.dispatch.stalled_threshold, 3);
    }

    #[test]
    fn partial_json_gets_defaults() {
        let s: HelmSettings =
            serde_json::from_str(r#"{"dispatch":{"reviewerInputCap":2000}}"#).unwrap();
        assert_eq!(s.dispatch.reviewer_input_cap, 2000);
        assert_eq!(s.dispatch.implementer_input_cap, 4800);
        assert_eq!(s.name, "helm");
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(HelmSettings::default()).unwrap();
        assert!(json["dispatch"]["implementerInputCap"].is_number());
        assert!(json["logging"]["level"].is_string());
    }
}
