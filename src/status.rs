//! Status reply parsing.
//!
//! Format: `STATUS:B1:<pwm>:B2:<pwm>[:B3:<pwm>]:MODE:<name>`

use crate::error::{BulbError, BulbResult};
use crate::protocol::{pwm_to_brightness, REPLY_SEPARATOR};

/// Parsed contents of a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Brightness percentage per channel, in channel order
    pub levels: Vec<u8>,
    /// Lower-cased mode name
    pub mode: String,
}

const STATUS_PREFIX: &str = "STATUS:";

/// Body after a case-insensitive `STATUS:` prefix.
fn strip_status_prefix(line: &str) -> Option<&str> {
    let head = line.get(..STATUS_PREFIX.len())?;
    if head.eq_ignore_ascii_case(STATUS_PREFIX) {
        line.get(STATUS_PREFIX.len()..)
    } else {
        None
    }
}

/// Find the `STATUS:` segment of a possibly multi-line reply.
///
/// The prefix matches in any case, as terminal-line detection does.
pub fn find_status_line(response: &str) -> Option<&str> {
    response
        .split(REPLY_SEPARATOR)
        .map(str::trim)
        .find(|segment| strip_status_prefix(segment).is_some())
}

/// Parse a status line for firmware driving `channels` channels.
///
/// # Errors
/// `MalformedStatus` when the field count, labels or values are off.
pub fn parse_status_line(line: &str, channels: u8) -> BulbResult<StatusReport> {
    let malformed = |reason: String| BulbError::MalformedStatus {
        line: line.to_string(),
        reason,
    };

    let body = strip_status_prefix(line.trim())
        .ok_or_else(|| malformed("missing STATUS: prefix".to_string()))?;
    let fields: Vec<&str> = body.split(':').map(str::trim).collect();

    let expected = usize::from(channels) * 2 + 2;
    if fields.len() != expected {
        return Err(malformed(format!(
            "expected {} fields for {} channels, got {}",
            expected,
            channels,
            fields.len()
        )));
    }

    let mut levels = Vec::with_capacity(usize::from(channels));
    for (index, pair) in fields[..expected - 2].chunks(2).enumerate() {
        let label = format!("B{}", index + 1);
        if !pair[0].eq_ignore_ascii_case(&label) {
            return Err(malformed(format!("expected label {}, got '{}'", label, pair[0])));
        }
        let pwm = pair[1]
            .parse::<u8>()
            .map_err(|_| malformed(format!("{} value '{}' is not 0-255", label, pair[1])))?;
        levels.push(pwm_to_brightness(pwm));
    }

    if !fields[expected - 2].eq_ignore_ascii_case("MODE") {
        return Err(malformed(format!(
            "expected MODE label, got '{}'",
            fields[expected - 2]
        )));
    }
    let mode = fields[expected - 1];
    if mode.is_empty() {
        return Err(malformed("empty mode".to_string()));
    }

    Ok(StatusReport {
        levels,
        mode: mode.to_lowercase(),
    })
}
