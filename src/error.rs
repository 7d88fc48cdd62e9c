//! Error types for the bulb driver.
//!
//! `BulbError` covers every failure the core can surface. Not every variant
//! reaches callers: per-port discovery failures (`PortUnavailable`) are logged
//! and swallowed by the connector, and malformed status lines
//! (`MalformedStatus`) only ever show up in the logs.
//!
//! ## Propagation
//!
//! - **Discovery**: `PortUnavailable` per candidate, `NoDeviceFound` once every
//!   candidate is exhausted.
//! - **Transport**: `LinkLost` after the reconnect budget is spent,
//!   `NotConnected` when no link could be established at all.
//! - **Ambiguous outcomes**: `ResponseTimeout` is produced only when a caller
//!   explicitly asks for a reply (see [`crate::protocol::Response::into_reply`]);
//!   silence is otherwise reported as a value, not an error.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type BulbResult<T> = std::result::Result<T, BulbError>;

/// Primary error type for the bulb driver.
#[derive(Error, Debug)]
pub enum BulbError {
    /// A single candidate port could not be opened or probed.
    ///
    /// Non-fatal during discovery: the connector logs it and moves on to the
    /// next candidate.
    #[error("Serial port '{port}' unavailable: {reason}")]
    PortUnavailable {
        /// Port path that failed.
        port: String,
        /// Underlying failure description.
        reason: String,
    },

    /// No candidate port identified itself as the controller.
    #[error("No bulb controller found (scanned {scanned} candidate port(s))")]
    NoDeviceFound {
        /// Number of candidates that were tried.
        scanned: usize,
    },

    /// The open link failed and the reconnect budget ran out.
    #[error("Link to bulb controller lost after {attempts} attempt(s): {reason}")]
    LinkLost {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Last I/O failure observed.
        reason: String,
    },

    /// No terminal line arrived within the response window.
    ///
    /// Ambiguous: the firmware may have acted silently.
    #[error("No response to '{command}' within the response window")]
    ResponseTimeout {
        /// Command text that went unanswered.
        command: String,
    },

    /// A status line failed to parse. The state cache was left untouched.
    #[error("Malformed status line '{line}': {reason}")]
    MalformedStatus {
        /// Offending line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No link is open and none could be established.
    #[error("Bulb controller not connected")]
    NotConnected,

    /// An effect name did not match any known effect kind.
    #[error("Unknown effect '{0}'")]
    UnknownEffect(String),

    /// Configuration loading or extraction failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed semantic validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raw I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for BulbError {
    fn from(err: figment::Error) -> Self {
        BulbError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_port() {
        let err = BulbError::PortUnavailable {
            port: "/dev/ttyUSB0".to_string(),
            reason: "Permission denied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyUSB0"));
        assert!(msg.contains("Permission denied"));
    }
}
