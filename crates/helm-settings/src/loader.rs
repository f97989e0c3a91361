//! Settings loading: file → deep-merge → env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::HelmSettings;

/// Path to the user settings file: `~/.helm/settings.json`.
pub fn settings_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or(SettingsError::NoHomeDir)?;
    Ok(PathBuf::from(home).join(".helm").join("settings.json"))
}

/// Load settings from the default path with env overrides.
///
/// A missing file is not an error — defaults apply.
pub fn load_settings() -> Result<HelmSettings> {
    let path = settings_path()?;
    if path.exists() {
        load_settings_from_path(&path)
    } else {
        let mut settings = HelmSettings::default();
        apply_env_overrides(&mut settings);
        Ok(settings)
    }
}

/// Load settings from a specific file, deep-merged over defaults, then
/// apply env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<HelmSettings> {
    let raw = std::fs::read_to_string(path)?;
    let user: Value = serde_json::from_str(&raw)?;

    let mut base = serde_json::to_value(HelmSettings::default())?;
    deep_merge(&mut base, &user);

    let mut settings: HelmSettings = serde_json::from_value(base)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-by-key; any other overlay value replaces the base
/// value wholesale. `null` in the overlay is ignored so partial files
/// cannot erase defaults.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if overlay_val.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        let _ = base_map.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base_slot, overlay_val) => {
            if !overlay_val.is_null() {
                *base_slot = overlay_val.clone();
            }
        }
    }
}

/// Apply `HELM_*` environment variable overrides (highest priority).
fn apply_env_overrides(settings: &mut HelmSettings) {
    if let Some(v) = env_u32("HELM_IMPLEMENTER_INPUT_CAP") {
        settings.dispatch.implementer_input_cap = v;
    }
    if let Some(v) = env_u32("HELM_REVIEWER_INPUT_CAP") {
        settings.dispatch.reviewer_input_cap = v;
    }
    if let Some(v) = env_u32("HELM_CHARS_PER_TOKEN") {
        settings.dispatch.chars_per_token = v;
    }
    if let Some(v) = env_u32("HELM_STALLED_THRESHOLD") {
        settings.dispatch.stalled_threshold = v;
    }
    if let Ok(v) = std::env::var("HELM_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
