//! Controller discovery.
//!
//! The firmware offers no structured identification, only a free-text greeting
//! after reset and a `PONG` to `PING`. Discovery therefore opens each candidate
//! port, lets the board settle, provokes some output and looks for known
//! tokens in whatever comes back.
//!
//! "Gentle handshake" per candidate:
//! 1. Open with fixed parameters (9600 8N1, short I/O timeout)
//! 2. Wait for the reset-on-open to finish, discard stale bytes
//! 3. Send a bare newline and collect lines for the probe window
//! 4. Match lines against the token set; if nothing matched, send `PING`
//!    and match its reply
//! 5. Keep the port on a match, close it otherwise

use crate::config::LinkConfig;
use crate::error::{BulbError, BulbResult};
use crate::ports::PortEnumerator;
use crate::protocol::Command;
use crate::serial::{Link, PortOpener};
use std::sync::Arc;

/// Tokens that identify the bulb controller (matched case-insensitively).
pub const DEFAULT_IDENTIFY_TOKENS: &[&str] = &[
    "SMART_BULBS",
    "VOICE_READY",
    "VOICE:READY",
    "READY",
    "HELLO",
    "LIGHT",
    "CONTROL",
    "OK:",
    "PONG",
    "STATUS:",
    "VOICE_ACTIVE",
];

/// Predicate over captured lines: does this output come from the controller?
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    tokens: Vec<String>,
}

impl Default for TokenMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFY_TOKENS.iter().copied())
    }
}

impl TokenMatcher {
    /// Build a matcher from a token set. Empty tokens are ignored.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens }
    }

    /// Return the first token found in any line, if any.
    pub fn find<'a, S: AsRef<str>>(&'a self, lines: &[S]) -> Option<&'a str> {
        lines.iter().find_map(|line| {
            let upper = line.as_ref().to_uppercase();
            self.tokens
                .iter()
                .find(|token| upper.contains(token.as_str()))
                .map(String::as_str)
        })
    }

    /// Whether any line contains a token.
    pub fn matches<S: AsRef<str>>(&self, lines: &[S]) -> bool {
        self.find(lines).is_some()
    }
}

/// Scans candidate ports and returns the first that identifies as the controller.
pub struct Connector {
    enumerator: Arc<dyn PortEnumerator>,
    opener: Arc<dyn PortOpener>,
    matcher: TokenMatcher,
    config: LinkConfig,
}

impl Connector {
    /// Create a connector over the given port source and opener.
    pub fn new(
        enumerator: Arc<dyn PortEnumerator>,
        opener: Arc<dyn PortOpener>,
        config: LinkConfig,
    ) -> Self {
        let matcher = TokenMatcher::new(&config.identify_tokens);
        Self {
            enumerator,
            opener,
            matcher,
            config,
        }
    }

    /// Link settings in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Scan candidates in order and return an identified link.
    ///
    /// # Errors
    /// `NoDeviceFound` when no candidate identifies. Per-port failures are
    /// logged and skipped.
    pub async fn connect(&self) -> BulbResult<Link> {
        let candidates = self.enumerator.list_candidates();
        tracing::info!(candidates = ?candidates, "Scanning for bulb controller");

        for port in &candidates {
            match self.probe(port).await {
                Ok(Some(link)) => return Ok(link),
                Ok(None) => {
                    tracing::debug!(port = %port, "No controller on port");
                }
                Err(e) => {
                    tracing::warn!(port = %port, error = %e, "Skipping port");
                }
            }
        }

        tracing::warn!(scanned = candidates.len(), "Could not find bulb controller on any port");
        Err(BulbError::NoDeviceFound {
            scanned: candidates.len(),
        })
    }

    /// Probe one port. `Ok(None)` means it opened but did not identify.
    async fn probe(&self, port: &str) -> BulbResult<Option<Link>> {
        tracing::debug!(port = %port, "Attempting connection");
        let io = self.opener.open(port, &self.config).await?;
        let mut link = Link::new(port, io);

        // Let the board finish its reset-on-open before talking to it
        tokio::time::sleep(self.config.settle()).await;
        link.discard_input(self.config.drain()).await;

        let unavailable = |e: std::io::Error| BulbError::PortUnavailable {
            port: port.to_string(),
            reason: e.to_string(),
        };

        link.write_line("").await.map_err(unavailable)?;
        let greeting = link
            .collect_lines(self.config.probe_window())
            .await
            .map_err(unavailable)?;
        if let Some(token) = self.matcher.find(&greeting) {
            tracing::info!(port = %port, token, "Bulb controller identified");
            return Ok(Some(link));
        }

        link.write_line(&Command::Ping.wire()).await.map_err(unavailable)?;
        let reply = link
            .collect_lines(self.config.ping_window())
            .await
            .map_err(unavailable)?;
        if let Some(token) = self.matcher.find(&reply) {
            tracing::info!(port = %port, token, "Bulb controller identified via PING");
            return Ok(Some(link));
        }

        tracing::debug!(port = %port, greeting = ?greeting, reply = ?reply, "Port did not identify");
        Ok(None)
    }
}
