//! Control engine binary for barnloop.
//!
//! This is the main entry point that wires together the zone tasks,
//! the plan and knowledge sinks, config hot reload and the command intake.
//! It loads configuration, starts every zone, and waits until the run
//! ends through `max_ticks`, an operator stop or Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `barnloop-config.yaml` (or `BARNLOOP_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create operator state from engine bounds
//! 4. Build plan and knowledge sinks
//! 5. Start one task group per zone
//! 6. Start the config watcher
//! 7. Start the command intake on stdin
//! 8. Install the Ctrl-C handler
//! 9. Wait for the run to end and log the result

mod commands;
mod error;
mod reload;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use barnloop_core::config::ControllerConfig;
use barnloop_core::operator::OperatorState;
use barnloop_core::runner;
use barnloop_core::sinks::{MemoryKnowledge, Sinks, TracingExecutor};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::reload::ConfigWatcher;

/// Default config file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "barnloop-config.yaml";

/// Application entry point for the control engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a zone fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is not up yet, so remember whether
    //    defaults were used and report it afterwards.
    let config_path = config_path();
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("barnloop-engine starting");
    if !from_file {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        zones = config.zones.len(),
        seed = config.engine.seed,
        tick_interval_ms = config.engine.tick_interval_ms,
        sim_step_s = config.engine.sim_step_s,
        analysis_interval_ms = config.engine.analysis_interval_ms,
        "Configuration loaded"
    );

    // 3. Create operator state.
    let operator = Arc::new(OperatorState::new(
        config.engine.tick_interval_ms,
        config.engine.max_ticks,
    ));
    info!(
        max_ticks = operator.max_ticks(),
        tick_interval_ms = operator.tick_interval_ms(),
        "Operator state initialized"
    );

    // 4. Build sinks.
    let sinks = Sinks {
        plans: Arc::new(TracingExecutor),
        knowledge: Arc::new(MemoryKnowledge::new(config.engine.history_capacity)),
    };

    // 5. Start zones.
    let runtime = runner::spawn_zones(&config, &operator, &sinks).map_err(EngineError::from)?;
    let zones = runtime.handles().to_vec();

    // 6. Start the config watcher.
    if from_file {
        let watcher = ConfigWatcher::new(&config_path).await;
        let interval = Duration::from_millis(config.engine.config_reload_interval_ms);
        let handles = zones.clone();
        let op = Arc::clone(&operator);
        tokio::spawn(async move {
            reload::watch_config(watcher, interval, handles, &op).await;
        });
    }

    // 7. Start the command intake.
    {
        let op = Arc::clone(&operator);
        tokio::spawn(async move {
            let lines = commands::spawn_stdin_reader();
            let routed = commands::read_commands(lines, zones, &op).await;
            info!(routed, "Command intake ended");
        });
    }

    // 8. Stop cleanly on Ctrl-C.
    {
        let op = Arc::clone(&operator);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping");
                    op.request_stop();
                }
                Err(e) => warn!(error = %e, "failed to listen for interrupt"),
            }
        });
    }

    // 9. Wait for the run to end.
    let summary = runtime.join(&operator).await.map_err(EngineError::from)?;
    runner::log_run_end(&summary);

    let status = operator.status().await;
    info!(
        end_reason = ?summary.end_reason,
        elapsed_seconds = status.elapsed_seconds,
        "barnloop-engine shutdown complete"
    );

    Ok(())
}

/// Path of the config file: `BARNLOOP_CONFIG` or the default name.
fn config_path() -> PathBuf {
    std::env::var_os("BARNLOOP_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the controller configuration.
///
/// Returns the config and whether it came from the file. A missing file
/// yields defaults with environment overrides applied.
fn load_config(path: &Path) -> Result<(ControllerConfig, bool), EngineError> {
    if path.exists() {
        let config = ControllerConfig::from_file(path)?;
        Ok((config, true))
    } else {
        let mut config = ControllerConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, false))
    }
}
