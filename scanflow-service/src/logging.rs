// Logging
// One-time tracing subscriber setup shared by the binaries

use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the scanflow crates, e.g. "info" or "debug"
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Include the module path of each event
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Directives applied when `RUST_LOG` is not set
    pub fn directives(&self) -> Vec<String> {
        ["scanflow_service", "scanflow_rpc", "scanflow"]
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .chain(["hyper=warn".to_string(), "reqwest=warn".to_string()])
            .collect()
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    config
        .directives()
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(EnvFilter::new("warn"), |filter, directive| filter.add_directive(directive))
}

/// Install the global subscriber; later calls are ignored
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config);
        let result = if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(config.include_target))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(config.include_target)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        };
        if let Err(e) = result {
            eprintln!("logging already initialised: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_follow_level() {
        let directives = LoggingConfig::with_level("debug").directives();
        assert!(directives.contains(&"scanflow_service=debug".to_string()));
        assert!(directives.contains(&"reqwest=warn".to_string()));
        for directive in directives {
            assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LoggingConfig::default());
        init_logging(&LoggingConfig::with_level("trace"));
    }
}
