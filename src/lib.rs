//! # Smart Bulbs Host Driver
//!
//! Host-side driver for a line-protocol microcontroller that switches and dims
//! two or three lighting channels over USB serial.
//!
//! ## Crate Structure
//!
//! - **`ports`**: platform-specific candidate serial port enumeration.
//! - **`serial`**: port opening (`tokio-serial`), newline framing, stale-input draining.
//! - **`handshake`**: discovery of the controller among candidate ports by greeting tokens.
//! - **`protocol`**: typed commands, reply collection and the brightness/PWM mapping.
//! - **`status`**: parsing of `STATUS:` replies.
//! - **`state`**: cached per-channel brightness and mode.
//! - **`session`**: the single owner of the link; serialized execution and reconnect.
//! - **`effects`**: cancellable, mutually exclusive background lighting effects.
//! - **`controller`**: `BulbController`, the API request surfaces call into.
//! - **`config`** / **`logging`** / **`error`**: ambient plumbing.
//!
//! ## Example
//!
//! ```no_run
//! use smart_bulbs::{BulbConfig, BulbController, Command, EffectKind, EffectParams};
//!
//! # async fn run() -> smart_bulbs::BulbResult<()> {
//! let controller = BulbController::new(BulbConfig::load()?);
//! controller.connect().await?;
//! controller.execute(&Command::parse("B1 ON")).await?;
//! controller.start_effect(EffectKind::Rainbow, EffectParams::with_speed(3)).await;
//! controller.stop_effects().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod effects;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod ports;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod state;
pub mod status;

pub use config::BulbConfig;
pub use controller::BulbController;
pub use effects::{EffectHandle, EffectKind, EffectParams};
pub use error::{BulbError, BulbResult};
pub use protocol::{Command, Response};
pub use state::{BulbChannel, DeviceState};
