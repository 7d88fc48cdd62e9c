//! Cached device state.
//!
//! The firmware cannot be queried cheaply during an effect, so the host keeps
//! its own picture of each channel. The cache is refreshed from `STATUS`
//! replies and otherwise updated optimistically from the commands that were
//! sent. Locks are never held across an `.await`.
//!
//! While a host effect runs it owns `mode`: neither `STATUS` replies nor
//! foreground `START STROBE`/`STOP` commands change it until the effect ends.

use crate::effects::EffectKind;
use crate::protocol::{pwm_to_brightness, BulbAction, Command, Switch};
use crate::status::{find_status_line, parse_status_line};
use parking_lot::RwLock;
use serde::Serialize;

/// Mode reported when no effect is running.
pub const MANUAL_MODE: &str = "manual";

/// Strobe speed assumed until the firmware reports one.
pub const DEFAULT_STROBE_SPEED: u8 = 2;

/// One lighting channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulbChannel {
    /// 1-based channel number
    pub id: u8,
    /// Brightness percentage (0-100)
    pub brightness: u8,
}

impl BulbChannel {
    fn new(id: u8) -> Self {
        Self { id, brightness: 0 }
    }

    /// A channel is on whenever it has any brightness.
    pub fn is_on(&self) -> bool {
        self.brightness > 0
    }
}

/// Snapshot of the last known device state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    /// Channels in order
    pub channels: Vec<BulbChannel>,
    /// `"manual"` or the running effect's name
    pub mode: String,
    /// Firmware strobe speed (1-5)
    pub strobe_speed: u8,
    /// Whether a link is open
    pub connected: bool,
    /// Port of the open link
    pub port: Option<String>,
    /// Host effect currently running, if any
    pub effect: Option<EffectKind>,
}

impl DeviceState {
    fn new(channels: u8) -> Self {
        Self {
            channels: (1..=channels).map(BulbChannel::new).collect(),
            mode: MANUAL_MODE.to_string(),
            strobe_speed: DEFAULT_STROBE_SPEED,
            connected: false,
            port: None,
            effect: None,
        }
    }

    /// Brightness of every channel, in order.
    pub fn levels(&self) -> Vec<u8> {
        self.channels.iter().map(|c| c.brightness).collect()
    }

    fn channel_mut(&mut self, id: u8) -> Option<&mut BulbChannel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }
}

/// Shared, internally synchronized device state.
#[derive(Debug)]
pub struct StateCache {
    inner: RwLock<DeviceState>,
}

impl StateCache {
    /// New cache with every channel off, manual mode, disconnected.
    pub fn new(channels: u8) -> Self {
        Self {
            inner: RwLock::new(DeviceState::new(channels)),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> DeviceState {
        self.inner.read().clone()
    }

    /// Number of channels tracked.
    pub fn channel_count(&self) -> u8 {
        self.inner.read().channels.len() as u8
    }

    /// Update from a reply that may contain a status line.
    ///
    /// Returns `true` when a status line was applied. A malformed line is
    /// logged and leaves the cache as it was.
    pub fn apply_status_response(&self, response: &str) -> bool {
        let Some(line) = find_status_line(response) else {
            tracing::warn!(response = %response, "STATUS reply carried no status line");
            return false;
        };

        match parse_status_line(line, self.channel_count()) {
            Ok(report) => {
                let mut state = self.inner.write();
                for (channel, level) in state.channels.iter_mut().zip(&report.levels) {
                    channel.brightness = *level;
                }
                if state.effect.is_none() {
                    state.mode = report.mode;
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed status line");
                false
            }
        }
    }

    /// Infer the effect of a command the device accepted.
    pub fn apply_command(&self, command: &Command) {
        let mut state = self.inner.write();
        match command {
            Command::Bulb { channel, action } => {
                let brightness = match action {
                    BulbAction::Switch(Switch::On) => 100,
                    BulbAction::Switch(Switch::Off) => 0,
                    BulbAction::Level(pwm) => pwm_to_brightness(*pwm),
                };
                match state.channel_mut(*channel) {
                    Some(c) => c.brightness = brightness,
                    None => tracing::debug!(channel, "Command addressed an untracked channel"),
                }
            }
            Command::All(switch) | Command::Both(switch) => {
                let brightness = if *switch == Switch::On { 100 } else { 0 };
                for c in state.channels.iter_mut() {
                    c.brightness = brightness;
                }
            }
            Command::StartStrobe if state.effect.is_none() => state.mode = "strobe".to_string(),
            Command::Stop if state.effect.is_none() => state.mode = MANUAL_MODE.to_string(),
            Command::StartStrobe | Command::Stop => {
                tracing::debug!(command = %command, "Effect running, mode left unchanged");
            }
            Command::StrobeSpeed(speed) => state.strobe_speed = *speed,
            Command::Status | Command::Ping | Command::Raw(_) => {}
        }
    }

    /// Hand `mode` to a starting host effect.
    pub fn begin_effect(&self, kind: EffectKind) {
        let mut state = self.inner.write();
        state.effect = Some(kind);
        state.mode = kind.as_str().to_string();
    }

    /// Release `mode` back to `"manual"`.
    pub fn end_effect(&self) {
        let mut state = self.inner.write();
        state.effect = None;
        state.mode = MANUAL_MODE.to_string();
    }

    /// Record link state. Disconnecting forgets the port.
    pub fn set_connected(&self, port: Option<&str>) {
        let mut state = self.inner.write();
        state.connected = port.is_some();
        state.port = port.map(str::to_string);
    }

    /// Record the firmware strobe speed.
    pub fn set_strobe_speed(&self, speed: u8) {
        self.inner.write().strobe_speed = speed;
    }

    /// Force every channel to 0.
    pub fn reset_channels(&self) {
        let mut state = self.inner.write();
        for channel in state.channels.iter_mut() {
            channel.brightness = 0;
        }
    }
}
