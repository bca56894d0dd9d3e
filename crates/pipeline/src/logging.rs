//! Tracing subscriber setup for the binary.

use cdx_core::config::LoggingConfig;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global fmt subscriber once.
///
/// `RUST_LOG` wins over the configured level. Output goes to stderr so
/// reports written to stdout stay machine readable. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // Another subscriber may already be installed (tests, embedding hosts).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        let config = LoggingConfig {
            level: "not a level ===".to_string(),
            with_target: true,
        };
        init_logging(&config);
        init_logging(&LoggingConfig::default());
        tracing::info!("logging initialised");
    }
}
