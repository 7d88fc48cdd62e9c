//! Core-facing API.
//!
//! [`BulbController`] is the one object a request surface (HTTP handler,
//! voice intent, CLI) holds. It owns the session, the state cache and the
//! effect scheduler, and exposes the five operations callers need.

use crate::config::BulbConfig;
use crate::effects::{EffectHandle, EffectKind, EffectParams, EffectScheduler};
use crate::error::BulbResult;
use crate::handshake::Connector;
use crate::ports::{FixedPorts, PortEnumerator, SystemPorts};
use crate::protocol::{Command, Response, Switch, REPLY_SEPARATOR};
use crate::serial::{PortOpener, SystemOpener};
use crate::session::Session;
use crate::state::{DeviceState, StateCache};
use std::sync::Arc;

/// Host-side driver for one bulb controller.
pub struct BulbController {
    session: Arc<Session>,
    effects: EffectScheduler,
    channels: u8,
}

impl BulbController {
    /// Controller for real hardware.
    ///
    /// Scans the platform's serial ports unless `link.port` pins one.
    pub fn new(config: BulbConfig) -> Self {
        let enumerator: Arc<dyn PortEnumerator> = match &config.link.port {
            Some(port) => Arc::new(FixedPorts(vec![port.clone()])),
            None => Arc::new(SystemPorts),
        };
        Self::with_transport(config, enumerator, Arc::new(SystemOpener))
    }

    /// Controller over a caller-supplied port source and opener.
    pub fn with_transport(
        config: BulbConfig,
        enumerator: Arc<dyn PortEnumerator>,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        let channels = config.link.channels;
        let state = Arc::new(StateCache::new(channels));
        let connector = Connector::new(enumerator, opener, config.link);
        let session = Arc::new(Session::new(connector, state));
        let effects = EffectScheduler::new(Arc::clone(&session), config.effects);
        Self {
            session,
            effects,
            channels,
        }
    }

    /// Discover the controller and refresh the cached state.
    pub async fn connect(&self) -> BulbResult<()> {
        self.session.connect().await
    }

    /// Close the link.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Execute a command.
    pub async fn execute(&self, command: &Command) -> BulbResult<Response> {
        self.session.execute(command).await
    }

    /// Parse and execute raw command text.
    pub async fn execute_text(&self, text: &str) -> BulbResult<Response> {
        self.execute(&Command::parse(text)).await
    }

    /// Set one channel to a brightness percentage.
    pub async fn set_brightness(&self, channel: u8, brightness: u8) -> BulbResult<Response> {
        self.execute(&Command::bulb_brightness(channel, brightness)).await
    }

    /// Switch every channel on or off with the keyword this firmware expects.
    pub async fn switch_all(&self, on: bool) -> BulbResult<Response> {
        let switch = if on { Switch::On } else { Switch::Off };
        self.execute(&Command::group(self.channels, switch)).await
    }

    /// Set every channel to the same brightness percentage.
    ///
    /// Sends one `B<n> <pwm>` per channel. Replies are joined like a
    /// multi-line reply; if no channel answered the result is `Accepted`.
    pub async fn set_all_brightness(&self, brightness: u8) -> BulbResult<Response> {
        let mut replies = Vec::new();
        for channel in 1..=self.channels {
            if let Response::Reply(text) = self.set_brightness(channel, brightness).await? {
                replies.push(text);
            }
        }
        if replies.is_empty() {
            Ok(Response::Accepted)
        } else {
            Ok(Response::Reply(replies.join(REPLY_SEPARATOR)))
        }
    }

    /// Ask the firmware for its status and return the refreshed state.
    pub async fn refresh(&self) -> BulbResult<DeviceState> {
        self.execute(&Command::Status).await?;
        Ok(self.get_state())
    }

    /// `PING` liveness check.
    pub async fn ping(&self) -> BulbResult<bool> {
        self.session.ping().await
    }

    /// Snapshot of the cached state.
    pub fn get_state(&self) -> DeviceState {
        self.session.state().snapshot()
    }

    /// Start an effect, stopping any running one first.
    pub async fn start_effect(&self, kind: EffectKind, params: EffectParams) -> EffectHandle {
        self.effects.start(kind, params).await
    }

    /// Stop effects and blank every channel.
    pub async fn stop_effects(&self) {
        self.effects.stop_all().await;
    }

    /// Handle of the running effect, if any.
    pub async fn active_effect(&self) -> Option<EffectHandle> {
        self.effects.active().await
    }
}
