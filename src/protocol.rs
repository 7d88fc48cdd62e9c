//! Line protocol spoken by the bulb firmware.
//!
//! Protocol Overview:
//! - Format: ASCII, one command per line
//! - Baud: 9600, 8N1, no flow control
//! - Command terminator: LF (\n)
//! - Commands: `B<n> ON|OFF|<pwm>`, `ALL ON|OFF` (`BOTH` on two-channel
//!   firmware), `START STROBE`, `STROBE SPEED <1-5>`, `STOP`, `STATUS`, `PING`
//! - Replies end with a line starting with one of [`TERMINAL_PREFIXES`]
//!
//! The firmware is chatty and unreliable: it may echo commands (verbatim or
//! as `CMD: ...`), interleave free text, or say nothing at all while still
//! acting on a command.

use crate::error::{BulbError, BulbResult};
use crate::serial::Link;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::time::Instant;

/// Line prefixes marking the logical end of a reply.
pub const TERMINAL_PREFIXES: &[&str] = &["OK:", "ERROR:", "STATUS:", "EFFECT:", "PONG", "STROBE_SPEED:"];

/// Prefix of firmware command echo lines.
pub const ECHO_PREFIX: &str = "CMD:";

/// Separator used to join multi-line replies.
pub const REPLY_SEPARATOR: &str = " | ";

/// Valid strobe speeds accepted by the firmware.
pub const STROBE_SPEEDS: std::ops::RangeInclusive<u8> = 1..=5;

/// Convert a brightness percentage (0-100) to a PWM duty value (0-255).
///
/// Values above 100 are clamped.
pub fn brightness_to_pwm(brightness: u8) -> u8 {
    (f64::from(brightness.min(100)) * 2.55).round() as u8
}

/// Convert a PWM duty value (0-255) back to a brightness percentage.
pub fn pwm_to_brightness(pwm: u8) -> u8 {
    (f64::from(pwm) / 2.55).round() as u8
}

/// On/off switch argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Full brightness
    On,
    /// Dark
    Off,
}

impl Switch {
    fn as_str(self) -> &'static str {
        match self {
            Switch::On => "ON",
            Switch::Off => "OFF",
        }
    }
}

/// Action on a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbAction {
    /// Switch fully on or off
    Switch(Switch),
    /// Set a PWM duty value
    Level(u8),
}

/// A command understood by the firmware.
///
/// Text that does not match a known command is kept verbatim as `Raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `B<n> ON|OFF|<pwm>` (channels are 1-based)
    Bulb {
        /// 1-based channel number
        channel: u8,
        /// What to do with it
        action: BulbAction,
    },
    /// `ALL ON|OFF` (three-channel firmware)
    All(Switch),
    /// `BOTH ON|OFF` (two-channel firmware)
    Both(Switch),
    /// `START STROBE` (firmware-side strobe)
    StartStrobe,
    /// `STROBE SPEED <1-5>`
    StrobeSpeed(u8),
    /// `STOP`
    Stop,
    /// `STATUS`
    Status,
    /// `PING`
    Ping,
    /// Anything else, sent as typed
    Raw(String),
}

impl Command {
    /// Set a channel to a brightness percentage.
    pub fn bulb_brightness(channel: u8, brightness: u8) -> Self {
        Command::Bulb {
            channel,
            action: BulbAction::Level(brightness_to_pwm(brightness)),
        }
    }

    /// Switch every channel, using the group keyword the firmware expects.
    pub fn group(channels: u8, switch: Switch) -> Self {
        if channels >= 3 {
            Command::All(switch)
        } else {
            Command::Both(switch)
        }
    }

    /// Parse command text. Unknown text becomes [`Command::Raw`].
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();

        let parsed = match tokens.as_slice() {
            ["ALL", arg] => parse_switch(arg).map(Command::All),
            ["BOTH", arg] => parse_switch(arg).map(Command::Both),
            [bulb, arg] if bulb.starts_with('B') => parse_bulb(&bulb[1..], arg),
            ["START", "STROBE"] => Some(Command::StartStrobe),
            ["STROBE", "SPEED", speed] => speed
                .parse::<u8>()
                .ok()
                .filter(|s| STROBE_SPEEDS.contains(s))
                .map(Command::StrobeSpeed),
            ["STOP"] => Some(Command::Stop),
            ["STATUS"] => Some(Command::Status),
            ["PING"] => Some(Command::Ping),
            _ => None,
        };

        parsed.unwrap_or_else(|| Command::Raw(trimmed.to_string()))
    }

    /// Wire text without the line terminator.
    pub fn wire(&self) -> String {
        self.to_string()
    }

    /// Whether the command belongs to the simple set that ack-less firmware
    /// may execute silently.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Command::Bulb { .. }
                | Command::All(_)
                | Command::Both(_)
                | Command::StartStrobe
                | Command::StrobeSpeed(_)
                | Command::Stop
        )
    }
}

fn parse_switch(arg: &str) -> Option<Switch> {
    match arg {
        "ON" => Some(Switch::On),
        "OFF" => Some(Switch::Off),
        _ => None,
    }
}

fn parse_bulb(number: &str, arg: &str) -> Option<Command> {
    let channel = number.parse::<u8>().ok().filter(|c| *c >= 1)?;
    let action = match parse_switch(arg) {
        Some(switch) => BulbAction::Switch(switch),
        None => BulbAction::Level(arg.parse::<u8>().ok()?),
    };
    Some(Command::Bulb { channel, action })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Bulb {
                channel,
                action: BulbAction::Switch(switch),
            } => write!(f, "B{} {}", channel, switch.as_str()),
            Command::Bulb {
                channel,
                action: BulbAction::Level(pwm),
            } => write!(f, "B{} {}", channel, pwm),
            Command::All(switch) => write!(f, "ALL {}", switch.as_str()),
            Command::Both(switch) => write!(f, "BOTH {}", switch.as_str()),
            Command::StartStrobe => f.write_str("START STROBE"),
            Command::StrobeSpeed(speed) => write!(f, "STROBE SPEED {}", speed),
            Command::Stop => f.write_str("STOP"),
            Command::Status => f.write_str("STATUS"),
            Command::Ping => f.write_str("PING"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

/// Outcome of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Lines the device sent back, joined with `" | "`
    Reply(String),
    /// Silence, but the command is in the simple set; assumed executed
    Accepted,
    /// Silence for a command that should have answered
    NoResponse,
}

impl Response {
    /// Reply text, if the device said anything.
    pub fn text(&self) -> Option<&str> {
        match self {
            Response::Reply(text) => Some(text),
            Response::Accepted | Response::NoResponse => None,
        }
    }

    /// Whether the device rejected the command with `ERROR:`.
    pub fn is_error_reply(&self) -> bool {
        self.text()
            .map(|text| text.split(REPLY_SEPARATOR).any(|line| line.to_ascii_uppercase().starts_with("ERROR:")))
            .unwrap_or(false)
    }

    /// Demand reply text, turning silence into `ResponseTimeout`.
    pub fn into_reply(self, command: &str) -> BulbResult<String> {
        match self {
            Response::Reply(text) => Ok(text),
            Response::Accepted | Response::NoResponse => Err(BulbError::ResponseTimeout {
                command: command.to_string(),
            }),
        }
    }
}

/// Whether `line` ends a reply.
pub fn is_terminal(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    TERMINAL_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

/// Whether `line` is an echo of `sent` rather than a reply.
pub fn is_echo(line: &str, sent: &str) -> bool {
    line.eq_ignore_ascii_case(sent) || line.to_ascii_uppercase().starts_with(ECHO_PREFIX)
}

/// Collect the reply to `sent` from `link`.
///
/// Reads until a terminal line or until `window` elapses. Echoes and blank
/// lines are dropped. Returns `Ok(None)` if nothing else arrived.
pub async fn collect_response(
    link: &mut Link,
    sent: &str,
    window: Duration,
) -> io::Result<Option<String>> {
    let deadline = Instant::now() + window;
    let mut lines: Vec<String> = Vec::new();

    while let Some(line) = link.read_line_until(deadline).await? {
        if line.is_empty() || is_echo(&line, sent) {
            continue;
        }
        let terminal = is_terminal(&line);
        lines.push(line);
        if terminal {
            break;
        }
    }

    if lines.is_empty() {
        Ok(None)
    } else {
        Ok(Some(lines.join(REPLY_SEPARATOR)))
    }
}

/// Extract the speed from a `STROBE_SPEED:<n>` reply line.
pub fn parse_strobe_speed(reply: &str) -> Option<u8> {
    reply
        .split(REPLY_SEPARATOR)
        .find_map(|line| line.trim().strip_prefix("STROBE_SPEED:"))
        .and_then(|value| value.trim().parse::<u8>().ok())
        .filter(|speed| STROBE_SPEEDS.contains(speed))
}
