//! Tracing subscriber setup shared by the `spark` binary and integration tests.

use std::fmt::Write as _;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG` env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "spark_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Parse a level name as written in settings files and env vars.
pub fn parse_level(raw: &str) -> Result<Level, TelemetryError> {
    raw.trim()
        .parse::<Level>()
        .map_err(|_| TelemetryError::UnknownLevel(raw.to_owned()))
}

/// Directive string fed to [`EnvFilter`] when `RUST_LOG` is unset.
pub fn build_filter(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        let _ = write!(filter, ",{}={}", module, level.to_string().to_lowercase());
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(build_filter(config)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))
}
