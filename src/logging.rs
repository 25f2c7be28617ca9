//! Logging setup
//!
//! The bridge emits `tracing` events throughout; this installs a formatting
//! subscriber for them when the module loads. A host process that already
//! installed a global subscriber keeps its own.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable overriding the configured filter
pub const LOG_ENV: &str = "HOSTLINK_LOG";

/// Build the event filter: `HOSTLINK_LOG` if set and valid, else the
/// configured directives, else `info`.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns `false` if logging is disabled or a subscriber was already set.
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        let config = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        assert!(!init(&config));
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(!init(&config));
    }

    #[test]
    fn test_bad_filter_falls_back() {
        let config = LoggingConfig {
            filter: "hostlink=[".to_string(),
            ..LoggingConfig::default()
        };
        // Must not panic
        let _ = filter(&config);
    }
}
