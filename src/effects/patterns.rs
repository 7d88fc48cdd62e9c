//! Frame generators for the host-driven effects.
//!
//! A frame is one PWM value (0-255) per channel. Patterns are endless and
//! periodic; the effect loop pulls one frame per step and sleeps
//! [`step_delay`] in between.

use super::EffectKind;
use std::time::Duration;

/// Strobe delay per speed 1..5, slowest first.
const STROBE_DELAYS_MS: [u64; 5] = [400, 250, 150, 80, 40];

/// Increment of the fade and pulse ramps.
const RAMP_STEP: u8 = 15;

/// Steps in one 0 -> 255 -> 0 triangle cycle.
const RAMP_PERIOD: usize = 2 * (255 / RAMP_STEP as usize);

/// Rainbow palette as RGB: red, orange, yellow, green, blue, indigo, violet.
const RAINBOW: [(u8, u8, u8); 7] = [
    (255, 0, 0),
    (255, 127, 0),
    (255, 255, 0),
    (0, 255, 0),
    (0, 0, 255),
    (75, 0, 130),
    (148, 0, 211),
];

/// Base delay of the non-strobe effects at speed 2.
fn base_delay_ms(kind: EffectKind) -> u64 {
    match kind {
        EffectKind::Strobe => STROBE_DELAYS_MS[1],
        EffectKind::Fade => 60,
        EffectKind::Pulse => 40,
        EffectKind::Alternate => 300,
        EffectKind::Rainbow => 500,
    }
}

/// Clamp a requested speed into 1..=5.
pub fn clamp_speed(speed: u8) -> u8 {
    speed.clamp(1, 5)
}

/// Delay between steps for `kind` at `speed` (clamped).
pub fn step_delay(kind: EffectKind, speed: u8) -> Duration {
    let speed = clamp_speed(speed);
    let ms = match kind {
        EffectKind::Strobe => STROBE_DELAYS_MS[usize::from(speed - 1)],
        _ => base_delay_ms(kind) * 2 / u64::from(speed),
    };
    Duration::from_millis(ms)
}

/// Triangle wave over [`RAMP_PERIOD`] steps, 0 at phase 0, 255 at mid-cycle.
fn ramp(phase: usize) -> u8 {
    let half = RAMP_PERIOD / 2;
    let phase = phase % RAMP_PERIOD;
    let rung = if phase <= half { phase } else { RAMP_PERIOD - phase };
    (rung * RAMP_STEP as usize) as u8
}

/// Endless frame sequence for one effect.
#[derive(Debug, Clone)]
pub struct Pattern {
    kind: EffectKind,
    channels: usize,
    step: usize,
}

impl Pattern {
    /// Pattern for `channels` channels, starting at step 0.
    pub fn new(kind: EffectKind, channels: u8) -> Self {
        Self {
            kind,
            channels: usize::from(channels.max(1)),
            step: 0,
        }
    }

    /// Number of steps before the pattern repeats.
    pub fn period(&self) -> usize {
        match self.kind {
            EffectKind::Strobe => 2,
            EffectKind::Fade | EffectKind::Pulse => RAMP_PERIOD,
            EffectKind::Alternate => self.channels,
            EffectKind::Rainbow => RAINBOW.len(),
        }
    }

    /// Frame at an arbitrary step.
    pub fn frame_at(&self, step: usize) -> Vec<u8> {
        let n = self.channels;
        match self.kind {
            EffectKind::Strobe => {
                let level = if step % 2 == 0 { 255 } else { 0 };
                vec![level; n]
            }
            EffectKind::Fade => (0..n)
                .map(|channel| ramp(step + channel * RAMP_PERIOD / n))
                .collect(),
            EffectKind::Pulse => vec![ramp(step); n],
            EffectKind::Alternate => (0..n)
                .map(|channel| if step % n == channel { 255 } else { 0 })
                .collect(),
            EffectKind::Rainbow => {
                let (r, g, b) = RAINBOW[step % RAINBOW.len()];
                match n {
                    1 => vec![r],
                    2 => vec![r, ((u16::from(g) + u16::from(b)) / 2) as u8],
                    _ => {
                        let mut frame = vec![r, g, b];
                        frame.resize(n, 0);
                        frame
                    }
                }
            }
        }
    }
}

impl Iterator for Pattern {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frame_at(self.step);
        self.step = (self.step + 1) % self.period();
        Some(frame)
    }
}
