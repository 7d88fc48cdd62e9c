//! In-memory bulb firmware for integration tests.
//!
//! `MockOpener` hands out `tokio::io::duplex` streams whose far end is driven
//! by a small firmware simulator, so the whole driver (discovery, session,
//! effects) runs without hardware.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use smart_bulbs::config::{BulbConfig, LinkConfig};
use smart_bulbs::error::{BulbError, BulbResult};
use smart_bulbs::ports::FixedPorts;
use smart_bulbs::serial::{DynSerial, PortOpener};
use smart_bulbs::BulbController;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::Instant;

// =============================================================================
// Firmware Simulator
// =============================================================================

/// Behavior of one simulated controller.
#[derive(Debug, Clone)]
pub struct Firmware {
    /// Line sent in reply to the probe newline
    pub greeting: Option<String>,
    /// Answer `PING` with `PONG`
    pub answers_ping: bool,
    /// Acknowledge commands with `OK:`/`ERROR:` lines
    pub acks: bool,
    /// Echo every command as `CMD: ...` before replying
    pub echoes: bool,
    /// Initial PWM levels, one per channel
    pub levels: Vec<u8>,
    /// Initial mode, as the firmware spells it
    pub mode: String,
    /// Close the stream after this many received lines
    pub hang_up_after: Option<usize>,
    /// Wait this long before answering each line
    pub reply_delay: Option<Duration>,
}

impl Firmware {
    /// Stock firmware: greets, acknowledges everything.
    pub fn stock(channels: u8) -> Self {
        Self {
            greeting: Some("SMART_BULBS v2 VOICE_READY".to_string()),
            answers_ping: true,
            acks: true,
            echoes: false,
            levels: vec![0; usize::from(channels)],
            mode: "MANUAL".to_string(),
            hang_up_after: None,
            reply_delay: None,
        }
    }

    /// Firmware that acts on commands without acknowledging them.
    pub fn ackless(channels: u8) -> Self {
        Self {
            acks: false,
            ..Self::stock(channels)
        }
    }

    pub fn with_levels(mut self, levels: &[u8], mode: &str) -> Self {
        self.levels = levels.to_vec();
        self.mode = mode.to_string();
        self
    }

    pub fn without_greeting(mut self) -> Self {
        self.greeting = None;
        self
    }

    pub fn with_greeting(mut self, greeting: &str) -> Self {
        self.greeting = Some(greeting.to_string());
        self
    }

    pub fn without_ping(mut self) -> Self {
        self.answers_ping = false;
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echoes = true;
        self
    }

    pub fn hang_up_after(mut self, lines: usize) -> Self {
        self.hang_up_after = Some(lines);
        self
    }

    /// Slow firmware: every reply arrives `delay` after its command.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }
}

/// What the simulated device saw and where it ended up.
#[derive(Debug)]
pub struct Recording {
    /// Every received line with its arrival time
    pub lines: Vec<(Instant, String)>,
    /// Current PWM level per channel
    pub levels: Vec<u8>,
    /// Current mode
    pub mode: String,
}

impl Recording {
    fn new(firmware: &Firmware) -> Self {
        Self {
            lines: Vec::new(),
            levels: firmware.levels.clone(),
            mode: firmware.mode.clone(),
        }
    }

    /// Received lines without timestamps.
    pub fn commands(&self) -> Vec<String> {
        self.lines.iter().map(|(_, line)| line.clone()).collect()
    }

    /// Arrival time of the first occurrence of `line`.
    pub fn arrival(&self, line: &str) -> Option<Instant> {
        self.lines
            .iter()
            .find(|(_, received)| received == line)
            .map(|(at, _)| *at)
    }

    fn status_line(&self) -> String {
        let mut line = "STATUS".to_string();
        for (index, level) in self.levels.iter().enumerate() {
            line.push_str(&format!(":B{}:{}", index + 1, level));
        }
        line.push_str(&format!(":MODE:{}", self.mode));
        line
    }
}

fn respond(firmware: &Firmware, recording: &Mutex<Recording>, line: &str) -> Vec<String> {
    let upper = line.to_ascii_uppercase();
    let tokens: Vec<&str> = upper.split_whitespace().collect();
    let mut rec = recording.lock();
    let mut out = Vec::new();

    if firmware.echoes && !tokens.is_empty() {
        out.push(format!("CMD: {}", line));
    }

    let ok = |out: &mut Vec<String>| {
        if firmware.acks {
            out.push(format!("OK:{}", upper));
        }
    };

    match tokens.as_slice() {
        [] => out.extend(firmware.greeting.clone()),
        ["PING"] => {
            if firmware.answers_ping {
                out.push("PONG".to_string());
            }
        }
        ["STATUS"] => out.push(rec.status_line()),
        ["ALL" | "BOTH", arg] => {
            let level = if *arg == "ON" { 255 } else { 0 };
            rec.levels.iter_mut().for_each(|l| *l = level);
            ok(&mut out);
        }
        ["START", "STROBE"] => {
            rec.mode = "STROBE".to_string();
            ok(&mut out);
        }
        ["STOP"] => {
            rec.mode = "MANUAL".to_string();
            ok(&mut out);
        }
        ["STROBE", "SPEED", speed] => {
            if firmware.acks {
                out.push(format!("STROBE_SPEED:{}", speed));
            }
        }
        [bulb, arg] if bulb.starts_with('B') => {
            let channel = bulb[1..].parse::<usize>().ok();
            let level = match *arg {
                "ON" => Some(255),
                "OFF" => Some(0),
                value => value.parse::<u8>().ok(),
            };
            match (channel, level) {
                (Some(c), Some(level)) if c >= 1 && c <= rec.levels.len() => {
                    rec.levels[c - 1] = level;
                    ok(&mut out);
                }
                _ => {
                    if firmware.acks {
                        out.push(format!("ERROR:Invalid {}", line));
                    }
                }
            }
        }
        _ => {
            if firmware.acks {
                out.push(format!("ERROR:Unknown command {}", line));
            }
        }
    }

    out
}

async fn run_firmware(device: DuplexStream, firmware: Firmware, recording: Arc<Mutex<Recording>>) {
    let (read_half, mut write_half) = tokio::io::split(device);
    let mut lines = BufReader::new(read_half).lines();
    let mut received = 0usize;

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        recording.lock().lines.push((Instant::now(), line.clone()));
        received += 1;

        let replies = respond(&firmware, &recording, &line);
        if let Some(delay) = firmware.reply_delay {
            tokio::time::sleep(delay).await;
        }
        for reply in replies {
            if write_half.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                return;
            }
        }

        if firmware.hang_up_after.is_some_and(|limit| received >= limit) {
            return;
        }
    }
}

async fn run_silent(device: DuplexStream) {
    let mut reader = BufReader::new(device);
    let mut line = String::new();
    while matches!(reader.read_line(&mut line).await, Ok(n) if n > 0) {
        line.clear();
    }
}

// =============================================================================
// Mock Opener
// =============================================================================

/// What happens when a port is opened.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// A bulb controller
    Firmware(Firmware),
    /// Opens, reads everything, never answers
    Silent,
    /// Fails to open
    Unavailable,
}

/// Port opener backed by in-memory devices.
///
/// Each port has a queue of behaviors; every open consumes the next one and
/// the last one repeats.
#[derive(Default)]
pub struct MockOpener {
    ports: Mutex<HashMap<String, Vec<Behavior>>>,
    opened: Mutex<Vec<String>>,
    recordings: Mutex<HashMap<String, Arc<Mutex<Recording>>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(self, name: &str, behaviors: Vec<Behavior>) -> Self {
        self.ports.lock().insert(name.to_string(), behaviors);
        self
    }

    /// Port names in open order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Recording of the most recent firmware opened on `port`.
    pub fn recording(&self, port: &str) -> Arc<Mutex<Recording>> {
        Arc::clone(
            self.recordings
                .lock()
                .get(port)
                .expect("no firmware was opened on this port"),
        )
    }

    fn next_behavior(&self, port: &str) -> Behavior {
        let mut ports = self.ports.lock();
        match ports.get_mut(port) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or(Behavior::Unavailable),
            None => Behavior::Unavailable,
        }
    }
}

#[async_trait]
impl PortOpener for MockOpener {
    async fn open(&self, port: &str, _config: &LinkConfig) -> BulbResult<DynSerial> {
        self.opened.lock().push(port.to_string());

        let (host, device) = tokio::io::duplex(4096);
        match self.next_behavior(port) {
            Behavior::Firmware(firmware) => {
                let recording = Arc::new(Mutex::new(Recording::new(&firmware)));
                self.recordings
                    .lock()
                    .insert(port.to_string(), Arc::clone(&recording));
                tokio::spawn(run_firmware(device, firmware, recording));
            }
            Behavior::Silent => {
                tokio::spawn(run_silent(device));
            }
            Behavior::Unavailable => {
                return Err(BulbError::PortUnavailable {
                    port: port.to_string(),
                    reason: "Permission denied".to_string(),
                });
            }
        }
        Ok(Box::new(host))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Configuration with timings shrunk for tests.
pub fn test_config(channels: u8) -> BulbConfig {
    let mut config = BulbConfig::default();
    config.link.channels = channels;
    config.link.settle_ms = 5;
    config.link.probe_window_ms = 60;
    config.link.ping_window_ms = 40;
    config.link.response_timeout_ms = 100;
    config.link.drain_ms = 1;
    config.link.reconnect_attempts = 2;
    config.link.reconnect_delay_ms = 10;
    config.effects.stop_timeout_ms = 500;
    config.effects.step_response_timeout_ms = 50;
    config
}

/// Controller over `opener`, scanning `ports`.
pub fn controller(config: BulbConfig, ports: &[&str], opener: Arc<MockOpener>) -> BulbController {
    let enumerator = Arc::new(FixedPorts(ports.iter().map(|p| p.to_string()).collect()));
    BulbController::with_transport(config, enumerator, opener)
}

/// Single stock controller on `/dev/ttyUSB0`, already connected.
pub async fn connected(config: BulbConfig, firmware: Firmware) -> (BulbController, Arc<MockOpener>) {
    let opener = Arc::new(MockOpener::new().port("/dev/ttyUSB0", vec![Behavior::Firmware(firmware)]));
    let controller = controller(config, &["/dev/ttyUSB0"], Arc::clone(&opener));
    controller.connect().await.expect("connect to simulated firmware");
    (controller, opener)
}
