//! Transport session: the single owner of the serial link.
//!
//! Every exchange with the firmware goes through [`Session::execute_within`],
//! which holds the link mutex for the whole write and response window so that
//! foreground commands and effect steps never interleave on the wire.
//!
//! ## Reconnect
//!
//! An I/O failure drops the link and clears `connected`. The session then
//! pauses, re-runs discovery and retries the command, up to
//! `reconnect_attempts` times. The pause mirrors what USB serial adapters need
//! to re-enumerate after a glitch.

use crate::error::{BulbError, BulbResult};
use crate::handshake::Connector;
use crate::protocol::{collect_response, parse_strobe_speed, Command, Response};
use crate::serial::Link;
use crate::state::StateCache;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Owns the open link and serializes command execution.
pub struct Session {
    connector: Connector,
    link: Mutex<Option<Link>>,
    state: Arc<StateCache>,
}

impl Session {
    /// New, disconnected session.
    pub fn new(connector: Connector, state: Arc<StateCache>) -> Self {
        Self {
            connector,
            link: Mutex::new(None),
            state,
        }
    }

    /// Shared state cache.
    pub fn state(&self) -> &Arc<StateCache> {
        &self.state
    }

    /// Whether a link is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.snapshot().connected
    }

    /// Close any open link, discover the controller and refresh the cache.
    ///
    /// # Errors
    /// `NoDeviceFound` when discovery fails; `connected` stays false.
    pub async fn connect(&self) -> BulbResult<()> {
        let mut slot = self.link.lock().await;
        self.close(&mut slot);
        self.establish(&mut slot).await
    }

    /// Close the link, if any.
    pub async fn disconnect(&self) {
        let mut slot = self.link.lock().await;
        self.close(&mut slot);
    }

    /// Execute a command with the configured response window.
    pub async fn execute(&self, command: &Command) -> BulbResult<Response> {
        self.execute_within(command, self.connector.config().response_timeout())
            .await
    }

    /// Execute a command, collecting its reply for at most `window`.
    ///
    /// Connects lazily if no link is open.
    ///
    /// # Errors
    /// `LinkLost` if an I/O failure persisted through every reconnect attempt,
    /// `NotConnected` if no link could be established at all.
    pub async fn execute_within(&self, command: &Command, window: Duration) -> BulbResult<Response> {
        let wire = command.wire();
        let config = self.connector.config();
        let attempts = config.reconnect_attempts + 1;
        let mut slot = self.link.lock().await;
        let mut last_io_error: Option<io::Error> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(config.reconnect_delay()).await;
            }

            if slot.is_none() {
                if let Err(e) = self.establish(&mut slot).await {
                    tracing::warn!(command = %wire, attempt, error = %e, "Reconnect failed");
                    continue;
                }
            }
            let Some(link) = slot.as_mut() else {
                continue;
            };

            match exchange(link, &wire, window, config.drain()).await {
                Ok(reply) => {
                    let response = classify(command, reply);
                    tracing::debug!(command = %wire, response = ?response, "Command executed");
                    // Cache updates land in wire order while the link is held
                    self.apply_side_effects(command, &response);
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(command = %wire, attempt, error = %e, "Serial link failed");
                    self.close(&mut slot);
                    last_io_error = Some(e);
                }
            }
        }

        match last_io_error {
            Some(e) => Err(BulbError::LinkLost {
                attempts,
                reason: e.to_string(),
            }),
            None => Err(BulbError::NotConnected),
        }
    }

    /// Liveness check: `true` when the firmware answers `PING` with `PONG`.
    pub async fn ping(&self) -> BulbResult<bool> {
        let response = self.execute(&Command::Ping).await?;
        Ok(response
            .text()
            .map(|text| text.to_ascii_uppercase().contains("PONG"))
            .unwrap_or(false))
    }

    /// Run discovery into an empty slot and refresh the cache.
    async fn establish(&self, slot: &mut Option<Link>) -> BulbResult<()> {
        let config = self.connector.config();
        let mut link = self.connector.connect().await?;

        let status = Command::Status.wire();
        let refreshed = exchange(&mut link, &status, config.response_timeout(), config.drain()).await?;
        match refreshed {
            Some(reply) => {
                self.state.apply_status_response(&reply);
            }
            None => tracing::warn!(port = %link.port(), "Initial status refresh got no reply"),
        }

        tracing::info!(port = %link.port(), "Connected to bulb controller");
        self.state.set_connected(Some(link.port()));
        *slot = Some(link);
        Ok(())
    }

    fn close(&self, slot: &mut Option<Link>) {
        if let Some(link) = slot.take() {
            tracing::info!(port = %link.port(), "Closing serial link");
        }
        self.state.set_connected(None);
    }

    fn apply_side_effects(&self, command: &Command, response: &Response) {
        if response.is_error_reply() {
            tracing::warn!(command = %command, response = ?response, "Device rejected command");
            return;
        }

        match (command, response) {
            (Command::Status, Response::Reply(text)) => {
                self.state.apply_status_response(text);
            }
            (Command::Status, _) => {
                tracing::warn!("STATUS got no reply; cache left as is");
            }
            (Command::StrobeSpeed(requested), _) => {
                let speed = response
                    .text()
                    .and_then(parse_strobe_speed)
                    .unwrap_or(*requested);
                self.state.set_strobe_speed(speed);
            }
            (command, _) if command.is_simple() => self.state.apply_command(command),
            _ => {}
        }
    }
}

/// Drain stale input, send one line and collect its reply.
async fn exchange(
    link: &mut Link,
    wire: &str,
    window: Duration,
    drain: Duration,
) -> io::Result<Option<String>> {
    link.discard_input(drain).await;
    tracing::trace!(port = %link.port(), command = %wire, "Sending");
    link.write_line(wire).await?;
    collect_response(link, wire, window).await
}

fn classify(command: &Command, reply: Option<String>) -> Response {
    match reply {
        Some(text) => Response::Reply(text),
        None if command.is_simple() => Response::Accepted,
        None => Response::NoResponse,
    }
}
