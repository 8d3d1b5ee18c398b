//! Line-oriented command intake.
//!
//! The engine reads one JSON object per line from standard input. A line
//! is either a manual [`Command`] for an actuator, or an operator directive
//! tagged with `"op"`:
//!
//! ```text
//! {"zone_id":"zone1","actuator_id":"fan","action":"SET","level":80,"ttl_s":600}
//! {"op":"pause"}
//! {"op":"speed","tick_interval_ms":250}
//! ```
//!
//! Blank lines are ignored. Malformed lines are logged and skipped; they
//! never stop the intake.

use std::io::BufRead;

use barnloop_core::operator::{MIN_TICK_INTERVAL_MS, OperatorState};
use barnloop_core::runner::ZoneHandle;
use barnloop_types::Command;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::EngineError;

/// Operator directive accepted on the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorDirective {
    /// Freeze every zone's simulation.
    Pause,
    /// Continue after a pause.
    Resume,
    /// End the run.
    Stop,
    /// Change the real-time tick interval.
    Speed {
        /// New interval in milliseconds.
        tick_interval_ms: u64,
    },
    /// Log the operator status.
    Status,
}

/// One parsed intake line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputLine {
    /// Operator control.
    Operator(OperatorDirective),
    /// Manual actuator command.
    Command(Command),
}

/// What happened to a routed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The line was empty.
    Blank,
    /// A command was queued for its zone.
    Queued,
    /// An operator directive was applied.
    Applied(OperatorDirective),
}

/// Parse one intake line.
///
/// Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns [`EngineError::Input`] if the line is neither a command nor a
/// directive.
pub fn parse_line(line: &str) -> Result<Option<InputLine>, EngineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| EngineError::Input {
            message: format!("unrecognised input line: {e}"),
        })
}

/// Parse one line and hand it to its zone or to the operator.
///
/// # Errors
///
/// Returns [`EngineError::Input`] if the line cannot be parsed, names an
/// unknown zone, or the zone rejects the command.
pub async fn route_line(
    line: &str,
    zones: &[ZoneHandle],
    operator: &OperatorState,
) -> Result<Routed, EngineError> {
    let Some(input) = parse_line(line)? else {
        return Ok(Routed::Blank);
    };
    match input {
        InputLine::Command(command) => {
            let handle = zones
                .iter()
                .find(|h| h.zone_id() == &command.zone_id)
                .ok_or_else(|| EngineError::Input {
                    message: format!("no running zone named {}", command.zone_id),
                })?;
            handle.submit(command).map_err(|e| EngineError::Input {
                message: e.to_string(),
            })?;
            Ok(Routed::Queued)
        }
        InputLine::Operator(directive) => {
            apply_directive(directive, operator).await;
            Ok(Routed::Applied(directive))
        }
    }
}

async fn apply_directive(directive: OperatorDirective, operator: &OperatorState) {
    match directive {
        OperatorDirective::Pause => {
            operator.pause();
            info!("Run paused by operator");
        }
        OperatorDirective::Resume => {
            operator.resume();
            info!("Run resumed by operator");
        }
        OperatorDirective::Stop => {
            operator.request_stop();
            info!("Stop requested by operator");
        }
        OperatorDirective::Speed { tick_interval_ms } => {
            match operator.set_tick_interval_ms(tick_interval_ms) {
                Some(previous_ms) => info!(
                    previous_ms,
                    tick_interval_ms, "Tick interval changed"
                ),
                None => warn!(
                    requested_ms = tick_interval_ms,
                    min_ms = MIN_TICK_INTERVAL_MS,
                    "tick interval below minimum, keeping current"
                ),
            }
        }
        OperatorDirective::Status => {
            let status = operator.status().await;
            match serde_json::to_string(&status) {
                Ok(json) => info!(status = %json, "Operator status"),
                Err(e) => warn!(error = %e, "failed to serialize operator status"),
            }
        }
    }
}

/// Capacity of the line channel between the stdin thread and the intake.
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Read stdin on a dedicated thread and forward each line.
///
/// Stdin reads block, so they live on a plain thread that does not hold up
/// runtime shutdown. The channel closes when stdin reaches end of file.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read command input");
                    break;
                }
            }
        }
    });
    rx
}

/// Route lines until the input closes or a stop is requested.
///
/// Returns the number of lines that were routed successfully.
pub async fn read_commands(
    mut lines: mpsc::Receiver<String>,
    zones: Vec<ZoneHandle>,
    operator: &OperatorState,
) -> u64 {
    let mut routed: u64 = 0;
    loop {
        let next = tokio::select! {
            () = operator.stopped() => break,
            next = lines.recv() => next,
        };
        let Some(line) = next else {
            info!("Command input closed");
            break;
        };
        match route_line(&line, &zones, operator).await {
            Ok(Routed::Blank) => {}
            Ok(_) => routed = routed.saturating_add(1),
            Err(e) => warn!(error = %e, "input line rejected"),
        }
    }
    routed
}
