//! Tracing subscriber wiring from [`LoggingSettings`](crate::types::LoggingSettings).

use tracing_subscriber::EnvFilter;

use crate::types::LoggingSettings;

/// Install a global tracing subscriber from logging settings.
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call more
/// than once — later calls are no-ops (the first subscriber wins).
pub fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let settings = LoggingSettings::default();
        init_tracing(&settings);
        init_tracing(&settings);
    }
}
