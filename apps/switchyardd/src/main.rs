//! Headless mode-orchestration daemon.
//!
//! Reads control commands from stdin, one per line, and writes one JSON
//! object per line to stdout. Events published by the controller are
//! interleaved on stdout as `{"event": ..., "payload": ...}` lines. Logs go
//! to stderr and are filtered with `RUST_LOG`.

mod command;
mod simulated;

use anyhow::Context;
use clap::Parser;
use command::{Command, HELP};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use switchyard_controller::{ControllerConfig, ModeController, SwitchOptions};
use switchyard_events::EventBus;
use switchyard_mode::{Mode, SharedObservations};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "switchyardd", version, about = "Operating-mode orchestration daemon")]
struct Cli {
    /// Application root holding the mode file
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// JSON config file (defaults to <ROOT>/config.json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Latency of each simulated mode handler
    #[arg(long, value_name = "MS", default_value_t = 50)]
    handler_latency_ms: u64,

    /// Start with the virtual controller driver disconnected
    #[arg(long)]
    no_driver: bool,
}

const CLI_CALLER: &str = "cli";

/// Writes bus events to stdout as JSON lines.
struct StdoutBus;

impl EventBus for StdoutBus {
    fn emit(&self, topic: &str, payload: Value) {
        print_line(&json!({ "event": topic, "payload": payload }));
    }
}

fn print_line(value: &Value) {
    let mut out = std::io::stdout().lock();
    if let Err(e) = writeln!(out, "{value}").and_then(|_| out.flush()) {
        tracing::warn!(error = %e, "Failed to write to stdout");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,switchyard=debug")),
        )
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(ControllerConfig::default_root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create application root {}", root.display()))?;

    let config_path = cli.config.unwrap_or_else(|| root.join("config.json"));
    let config = ControllerConfig::load(&config_path)?;
    tracing::info!(root = ?root, config = ?config_path, "Starting switchyardd");

    let observations = SharedObservations::new();
    observations.set_driver_connected(!cli.no_driver);
    observations.set_device_connected(true);

    let registry = simulated::registry(
        Mode::default(),
        &observations,
        Duration::from_millis(cli.handler_latency_ms),
    );

    let controller = ModeController::open(&root, config, registry)?
        .provider(Arc::new(observations.clone()))
        .event_bus(Arc::new(StdoutBus))
        .build();

    controller.start()?;
    if !controller.initialize_from_persistence().await {
        tracing::warn!(mode = %controller.current_mode(), "Persisted mode could not be restored");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };

        // EOF
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => {
                print_line(&json!({ "error": message }));
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }
        let response = run(&controller, &observations, command).await?;
        print_line(&response);
    }

    controller.shutdown().await;
    tracing::info!("switchyardd stopped");
    Ok(())
}

async fn run(
    controller: &ModeController,
    observations: &SharedObservations,
    command: Command,
) -> anyhow::Result<Value> {
    let response = match command {
        Command::Switch(mode) => {
            let outcome = controller
                .switch_with(mode, SwitchOptions::caller(CLI_CALLER))
                .await;
            serde_json::to_value(outcome)?
        }
        Command::Toggle => {
            let mode = controller.toggle().await;
            json!({ "mode": mode })
        }
        Command::Status => serde_json::to_value(controller.diagnostics_summary())?,
        Command::Health => serde_json::to_value(controller.diagnostics().run_health_check())?,
        Command::Validate => serde_json::to_value(controller.validate_system_state())?,
        Command::History(limit) => serde_json::to_value(controller.recent_transitions(limit))?,
        Command::Driver(connected) => {
            observations.set_driver_connected(connected);
            json!({ "driver_connected": connected })
        }
        Command::Device(connected) => {
            observations.set_device_connected(connected);
            json!({ "device_connected": connected })
        }
        Command::Help => json!({ "help": HELP }),
        Command::Quit => Value::Null,
    };
    Ok(response)
}
