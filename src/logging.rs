//! Tracing setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the process that embeds it. The `smart-bulbs` binary uses [`init_from_config`],
//! which writes to stderr so command output on stdout stays machine-readable.
//!
//! # Example
//! ```no_run
//! use smart_bulbs::{config::BulbConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BulbConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("bulb driver starting");
//! # Ok(())
//! # }
//! ```

use crate::config::BulbConfig;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout, selected by `application.log_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, with source locations
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber settings derived from [`BulbConfig`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level used when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Colorize output; only when stderr is a terminal
    pub ansi: bool,
}

impl TracingConfig {
    /// Derive subscriber settings from the application configuration.
    pub fn from_config(config: &BulbConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ansi: std::io::stderr().is_terminal(),
        })
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string().to_lowercase()))
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &BulbConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install a stderr subscriber.
///
/// Idempotent: a second call after a subscriber is installed returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = config.env_filter();
    let base = fmt::layer().with_writer(std::io::stderr);

    let layer = match config.format {
        OutputFormat::Pretty => base
            .pretty()
            .with_ansi(config.ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Compact => base
            .compact()
            .with_target(false)
            .with_ansi(config.ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Json => base.json().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // Already initialized is expected in tests and embedding processes
            if e.to_string().contains("global default trace dispatcher") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse a configured level name, case-insensitively.
fn parse_log_level(level: &str) -> Result<Level, String> {
    level.trim().parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}
