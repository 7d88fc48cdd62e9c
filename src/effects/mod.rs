//! Host-driven lighting effects.
//!
//! At most one effect runs at a time, as a background tokio task that writes
//! per-channel levels through the shared [`Session`]. Starting an effect
//! cancels the running one and waits for its loop to exit before the new
//! loop takes its first step.
//!
//! Cancellation is cooperative: the loop checks its [`CancelToken`] between
//! writes and its inter-step sleep wakes on cancellation. A loop that does not
//! exit within the stop timeout (a write stuck in a reconnect, say) is aborted
//! and its link torn down, since the aborted write's reply may still be in
//! flight. The scheduler then blanks the channels over a fresh link.

pub mod cancel;
pub mod patterns;

pub use cancel::CancelToken;
pub use patterns::Pattern;

use crate::config::EffectConfig;
use crate::error::BulbError;
use crate::protocol::{BulbAction, Command};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

// =============================================================================
// Effect Types
// =============================================================================

/// Available effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    /// All channels blink together
    Strobe,
    /// Phase-offset triangle ramps
    Fade,
    /// All channels breathe together
    Pulse,
    /// One channel lit at a time, rotating
    Alternate,
    /// Seven-color palette cycle
    Rainbow,
}

impl EffectKind {
    /// Every effect, in display order.
    pub const ALL: [EffectKind; 5] = [
        EffectKind::Strobe,
        EffectKind::Fade,
        EffectKind::Pulse,
        EffectKind::Alternate,
        EffectKind::Rainbow,
    ];

    /// Mode name reported in the device state.
    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::Strobe => "strobe",
            EffectKind::Fade => "fade",
            EffectKind::Pulse => "pulse",
            EffectKind::Alternate => "alternate",
            EffectKind::Rainbow => "rainbow",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = BulbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| BulbError::UnknownEffect(s.to_string()))
    }
}

/// Effect parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParams {
    /// Speed 1 (slowest) to 5 (fastest); out-of-range values are clamped
    pub speed: u8,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self { speed: 2 }
    }
}

impl EffectParams {
    /// Parameters with the given speed.
    pub fn with_speed(speed: u8) -> Self {
        Self { speed }
    }
}

/// Handle to a started effect.
#[derive(Debug, Clone)]
pub struct EffectHandle {
    kind: EffectKind,
    id: u64,
    cancel: CancelToken,
    running: Arc<AtomicBool>,
}

impl EffectHandle {
    /// Effect kind.
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Scheduler-assigned id, unique per scheduler.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the effect task is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the effect to stop. Returns immediately; the loop exits at its next
    /// step boundary and blanks every channel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Clears the running flag when the task ends, including on abort.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ActiveEffect {
    handle: EffectHandle,
    task: JoinHandle<()>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Runs at most one effect at a time.
pub struct EffectScheduler {
    session: Arc<Session>,
    config: EffectConfig,
    active: Mutex<Option<ActiveEffect>>,
    next_id: AtomicU64,
}

impl EffectScheduler {
    /// New scheduler writing through `session`.
    pub fn new(session: Arc<Session>, config: EffectConfig) -> Self {
        Self {
            session,
            config,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stop whatever is running, then start `kind`.
    pub async fn start(&self, kind: EffectKind, params: EffectParams) -> EffectHandle {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.shutdown(previous).await;
        }

        let speed = patterns::clamp_speed(params.speed);
        let handle = EffectHandle {
            kind,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            cancel: CancelToken::new(),
            running: Arc::new(AtomicBool::new(true)),
        };

        self.session.state().begin_effect(kind);
        tracing::info!(effect = %kind, id = handle.id, speed, "Starting effect");

        let span = tracing::info_span!("effect", kind = %kind, id = handle.id);
        let task = tokio::spawn(
            run_effect(
                Arc::clone(&self.session),
                kind,
                speed,
                handle.cancel.clone(),
                RunningGuard(Arc::clone(&handle.running)),
                self.config.step_response_timeout(),
            )
            .instrument(span),
        );

        *active = Some(ActiveEffect {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Stop any effect, halt the firmware strobe and blank every channel.
    ///
    /// Always leaves the cached channels at 0 and the mode at `"manual"`,
    /// even when the device cannot be reached.
    pub async fn stop_all(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.shutdown(previous).await;
        }

        if self.session.is_connected() {
            if let Err(e) = self.session.execute(&Command::Stop).await {
                tracing::warn!(error = %e, "Failed to send STOP");
            }
            blank_channels(&self.session, self.config.step_response_timeout()).await;
        } else {
            tracing::debug!("Not connected, resetting cached state only");
        }

        let state = self.session.state();
        state.reset_channels();
        state.end_effect();
        tracing::info!("All effects stopped");
    }

    /// Handle of the running effect, if any.
    pub async fn active(&self) -> Option<EffectHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|effect| effect.handle.clone())
            .filter(EffectHandle::is_running)
    }

    /// Cancel and join one effect.
    ///
    /// A task that overruns the stop timeout is aborted and the link it was
    /// using is dropped before the channels are blanked.
    async fn shutdown(&self, mut effect: ActiveEffect) {
        let id = effect.handle.id;
        effect.handle.cancel();

        match tokio::time::timeout(self.config.stop_timeout(), &mut effect.task).await {
            Ok(Ok(())) => tracing::debug!(id, "Effect exited"),
            Ok(Err(e)) => {
                tracing::error!(id, error = %e, "Effect task failed");
                self.session.disconnect().await;
                blank_channels(&self.session, self.config.step_response_timeout()).await;
            }
            Err(_) => {
                tracing::warn!(
                    id,
                    timeout_ms = self.config.stop_timeout_ms,
                    "Effect did not stop in time, aborting"
                );
                effect.task.abort();
                let _ = effect.task.await;
                self.session.disconnect().await;
                blank_channels(&self.session, self.config.step_response_timeout()).await;
            }
        }

        self.session.state().end_effect();
    }
}

// =============================================================================
// Effect Loop
// =============================================================================

async fn run_effect(
    session: Arc<Session>,
    kind: EffectKind,
    speed: u8,
    cancel: CancelToken,
    _running: RunningGuard,
    step_timeout: Duration,
) {
    let channels = session.state().channel_count();
    let delay = patterns::step_delay(kind, speed);
    // Last level written per channel; None forces a write
    let mut written: Vec<Option<u8>> = vec![None; usize::from(channels.max(1))];

    'steps: for frame in Pattern::new(kind, channels) {
        for (index, level) in frame.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break 'steps;
            }
            if written[index] == Some(level) {
                continue;
            }
            let command = Command::Bulb {
                channel: index as u8 + 1,
                action: BulbAction::Level(level),
            };
            match session.execute_within(&command, step_timeout).await {
                Ok(_) => written[index] = Some(level),
                Err(e) => {
                    tracing::warn!(effect = %kind, command = %command, error = %e, "Effect write failed");
                    written[index] = None;
                }
            }
        }

        if !cancel.sleep(delay).await {
            break;
        }
    }

    tracing::debug!(effect = %kind, "Effect loop exited, blanking channels");
    blank_channels(&session, step_timeout).await;
    session.state().end_effect();
}

/// Drive every channel to 0 and reset the cached levels.
async fn blank_channels(session: &Session, step_timeout: Duration) {
    let state = session.state();
    for channel in 1..=state.channel_count() {
        let command = Command::Bulb {
            channel,
            action: BulbAction::Level(0),
        };
        if let Err(e) = session.execute_within(&command, step_timeout).await {
            tracing::warn!(command = %command, error = %e, "Failed to blank channel");
        }
    }
    state.reset_channels();
}
