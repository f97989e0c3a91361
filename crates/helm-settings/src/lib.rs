//! # helm-settings
//!
//! Configuration management with layered sources for the Helm dispatch runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`HelmSettings::default()`]
//! 2. **User file** — `~/.helm/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `HELM_*` overrides (highest priority)
//!
//! The global singleton is reloadable: orchestrators that rewrite
//! `settings.json` call [`reload_settings_from_path`] to swap the cached
//! value so all subsequent [`get_settings`] calls return fresh data.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod logging;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings singleton.
///
/// Reads are cheap (shared lock + `Arc::clone`); writes only happen on
/// reload, which is rare.
static SETTINGS: RwLock<Option<Arc<HelmSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.helm/settings.json` with env var
/// overrides. On subsequent calls, returns the cached value. If loading
/// fails, returns compiled defaults.
pub fn get_settings() -> Arc<HelmSettings> {
    {
        let guard = SETTINGS.read();
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write();
    // Double-check after acquiring write lock (another thread may have initialized)
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            HelmSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and startup
/// paths where the settings are already known.
pub fn init_settings(settings: HelmSettings) {
    let mut guard = SETTINGS.write();
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path.
///
/// Reads the file, deep-merges over defaults, applies env overrides, and
/// atomically swaps the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "settings reload failed, keeping defaults");
            HelmSettings::default()
        }
    });
    let mut guard = SETTINGS.write();
    *guard = Some(new);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_get_returns_same_values() {
        let mut settings = HelmSettings::default();
        settings.dispatch.stalled_threshold = 7;
        init_settings(settings);
        assert_eq!(get_settings().dispatch.stalled_threshold, 7);
        // Restore defaults for other tests sharing the singleton.
        init_settings(HelmSettings::default());
    }
}
