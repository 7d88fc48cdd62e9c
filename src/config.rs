//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/smart_bulbs.toml` (or an explicit path)
//! 2. Environment variables prefixed with `SMART_BULBS_`, nested keys separated
//!    by a double underscore (e.g. `SMART_BULBS_LINK__PORT=/dev/ttyUSB0`)
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration for the stock firmware.
//!
//! # Example
//! ```no_run
//! use smart_bulbs::config::BulbConfig;
//!
//! let config = BulbConfig::load()?;
//! config.validate()?;
//! println!("Channels: {}", config.link.channels);
//! # Ok::<(), smart_bulbs::error::BulbError>(())
//! ```

use crate::error::{BulbError, BulbResult};
use crate::handshake::DEFAULT_IDENTIFY_TOKENS;
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/smart_bulbs.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SMART_BULBS_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BulbConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link, handshake and transport settings
    pub link: LinkConfig,
    /// Effect scheduler settings
    pub effects: EffectConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, reported in the startup log line
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log layout: pretty, compact or json
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Smart Bulbs".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Serial link configuration.
///
/// Timings are in milliseconds. The defaults match an Arduino-class board that
/// resets when the port is opened and answers at 9600 baud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Pin discovery to a single port instead of scanning candidates.
    pub port: Option<String>,
    /// Baud rate (8N1, no flow control)
    pub baud_rate: u32,
    /// Read/write timeout handed to the serial driver
    pub io_timeout_ms: u64,
    /// Wait after opening a port for the board's reset-on-open to finish
    pub settle_ms: u64,
    /// Collection window for the greeting after the probe newline
    pub probe_window_ms: u64,
    /// Collection window for the PING fallback probe
    pub ping_window_ms: u64,
    /// Response window for a command
    pub response_timeout_ms: u64,
    /// Time spent discarding stale input before each command
    pub drain_ms: u64,
    /// Reconnect attempts after a link failure (0 disables reconnect)
    pub reconnect_attempts: u32,
    /// Pause between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Number of bulb channels driven by the firmware (2 or 3)
    pub channels: u8,
    /// Case-insensitive substrings that identify the controller
    pub identify_tokens: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            io_timeout_ms: 1000,
            settle_ms: 2000,
            probe_window_ms: 2000,
            ping_window_ms: 500,
            response_timeout_ms: 2000,
            drain_ms: 10,
            reconnect_attempts: 2,
            reconnect_delay_ms: 1000,
            channels: 3,
            identify_tokens: DEFAULT_IDENTIFY_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl LinkConfig {
    /// Serial driver read/write timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Settle time after opening a port.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Greeting collection window.
    pub fn probe_window(&self) -> Duration {
        Duration::from_millis(self.probe_window_ms)
    }

    /// PING reply collection window.
    pub fn ping_window(&self) -> Duration {
        Duration::from_millis(self.ping_window_ms)
    }

    /// Default command response window.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Stale-input drain window.
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    /// Pause between reconnect attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Effect scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Speed used when a start request carries none (1-5)
    pub default_speed: u8,
    /// How long to wait for a cancelled effect to exit before aborting it
    pub stop_timeout_ms: u64,
    /// Response window for each effect step write
    pub step_response_timeout_ms: u64,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            default_speed: 2,
            stop_timeout_ms: 2000,
            step_response_timeout_ms: 150,
        }
    }
}

impl EffectConfig {
    /// Bounded wait for a cancelled effect.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Response window for effect step writes.
    pub fn step_response_timeout(&self) -> Duration {
        Duration::from_millis(self.step_response_timeout_ms)
    }
}

impl BulbConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> BulbResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BulbResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BulbResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BulbError::InvalidConfig(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(2..=3).contains(&self.link.channels) {
            return Err(BulbError::InvalidConfig(format!(
                "Invalid channel count {}. Firmware drives 2 or 3 channels",
                self.link.channels
            )));
        }

        if self.link.baud_rate == 0 {
            return Err(BulbError::InvalidConfig(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.link.identify_tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(BulbError::InvalidConfig(
                "identify_tokens must contain at least one non-empty token".to_string(),
            ));
        }

        if !(1..=5).contains(&self.effects.default_speed) {
            return Err(BulbError::InvalidConfig(format!(
                "Invalid default_speed {}. Must be 1-5",
                self.effects.default_speed
            )));
        }

        Ok(())
    }
}
