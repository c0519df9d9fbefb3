//! Logging setup.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`, falling
//! back to the configured level (`WEFT_LOG_LEVEL` / `[logging].level`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Build the env filter for the given config.
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("weft={}", config.level))
            .unwrap_or_else(|_| EnvFilter::new("weft=info"))
    })
}

/// Initialize global logging.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_from_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            json: false,
        };
        let filter = build_filter(&config);
        // RUST_LOG may be set in CI; only check the fallback path when it is not.
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.to_string(), "weft=debug");
        }
    }

    #[test]
    fn test_build_filter_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "not a level!!".to_string(),
            json: false,
        };
        let filter = build_filter(&config);
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.to_string(), "weft=info");
        }
    }
}
