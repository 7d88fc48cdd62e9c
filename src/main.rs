//! CLI Entry Point for smart-bulbs
//!
//! Provides command-line access to the bulb controller:
//! - Listing candidate serial ports
//! - Sending a single raw command
//! - Printing the refreshed device state as JSON
//! - Running an effect for a fixed time
//!
//! # Usage
//!
//! ```bash
//! smart-bulbs ports
//! smart-bulbs send "B1 ON"
//! smart-bulbs status
//! smart-bulbs effect rainbow --speed 3 --seconds 10
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smart_bulbs::config::{BulbConfig, DEFAULT_CONFIG_PATH};
use smart_bulbs::ports::{self, FixedPorts, PortEnumerator};
use smart_bulbs::{logging, BulbController, EffectKind, EffectParams, Response};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "smart-bulbs")]
#[command(about = "Host driver for the smart bulbs serial controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate serial ports
    Ports,

    /// Send one command line and print the outcome
    Send {
        /// Command text, e.g. "B1 128" or "ALL OFF"
        command: String,
    },

    /// Refresh and print the device state as JSON
    Status,

    /// Run an effect, then stop it
    Effect {
        /// strobe, fade, pulse, alternate or rainbow
        kind: EffectKind,

        /// Speed 1 (slow) to 5 (fast)
        #[arg(long)]
        speed: Option<u8>,

        /// How long to run before stopping
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BulbConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    tracing::debug!(app = %config.application.name, config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Ports => list_ports(&config),
        Commands::Send { command } => send(config, &command).await,
        Commands::Status => status(config).await,
        Commands::Effect {
            kind,
            speed,
            seconds,
        } => {
            let speed = speed.unwrap_or(config.effects.default_speed);
            run_effect(config, kind, speed, Duration::from_secs(seconds)).await
        }
    }
}

fn list_ports(config: &BulbConfig) -> Result<()> {
    let candidates = match &config.link.port {
        Some(port) => FixedPorts(vec![port.clone()]).list_candidates(),
        None => ports::list_candidates(),
    };

    if candidates.is_empty() {
        println!("No candidate serial ports found");
    }
    for port in candidates {
        println!("{}", port);
    }
    Ok(())
}

async fn connected(config: BulbConfig) -> Result<BulbController> {
    let controller = BulbController::new(config);
    controller
        .connect()
        .await
        .context("connecting to bulb controller")?;
    if let Some(port) = controller.get_state().port {
        eprintln!("🔌 Connected on {}", port);
    }
    Ok(controller)
}

async fn send(config: BulbConfig, command: &str) -> Result<()> {
    let controller = connected(config).await?;
    match controller.execute_text(command).await? {
        Response::Reply(text) => println!("{}", text),
        Response::Accepted => println!("(no reply, assumed executed)"),
        Response::NoResponse => println!("(no reply)"),
    }
    controller.disconnect().await;
    Ok(())
}

async fn status(config: BulbConfig) -> Result<()> {
    let controller = connected(config).await?;
    let state = controller.refresh().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    controller.disconnect().await;
    Ok(())
}

async fn run_effect(config: BulbConfig, kind: EffectKind, speed: u8, duration: Duration) -> Result<()> {
    let controller = connected(config).await?;
    let handle = controller
        .start_effect(kind, EffectParams::with_speed(speed))
        .await;
    eprintln!("✨ Running {} (id {}) for {:?}, Ctrl+C to stop early", kind, handle.id(), duration);

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    controller.stop_effects().await;
    eprintln!("👋 Effect stopped");
    controller.disconnect().await;
    Ok(())
}
