//! Async zone runner with operator controls.
//!
//! This module provides [`spawn_zones`], which starts one independent task
//! group per zone, and [`ZoneRuntime::join`], which waits for them. Each
//! zone runs three loops concurrently:
//!
//! - **Simulation**: advances physics every `tick_interval_ms` (runtime
//!   adjustable) and publishes the latest [`ReadingBatch`] on a `watch`
//!   channel.
//! - **Analysis**: wakes every `analysis_interval_ms`, classifies the newest
//!   batch and sends a [`StatusBatch`] to the decision loop.
//! - **Decision**: event-driven; drains pending commands, decides, publishes
//!   the new actuator table and hands plans to the sinks.
//!
//! The simulation loop honours pause, stop and `max_ticks`. When it ends,
//! the analysis and decision loops drain and end after it.

use std::sync::Arc;
use std::time::Duration;

use barnloop_types::{Command, EnvironmentState, ZoneId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::{ConfigError, ConfigHandle, ControllerConfig, ZoneConfig};
use crate::decision::ActuatorTable;
use crate::operator::{OperatorState, RunEndReason};
use crate::overrides::CommandError;
use crate::pipeline::{
    AnalysisStage, DecisionStage, PipelineError, ReadingBatch, SimulationStage, StatusBatch,
};
use crate::sinks::{KnowledgeSink, Sinks};

/// Capacity of the analysis-to-decision status channel.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Errors that can occur while running zones.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A zone configuration is invalid.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A zone could not continue.
    #[error("pipeline error: {source}")]
    Pipeline {
        /// The underlying pipeline error.
        #[from]
        source: PipelineError,
    },

    /// A zone task panicked or was cancelled.
    #[error("zone task failed: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Control surface of one running zone.
#[derive(Debug, Clone)]
pub struct ZoneHandle {
    zone_id: ZoneId,
    commands: mpsc::Sender<Command>,
    config: ConfigHandle,
    actuators: watch::Receiver<Arc<ActuatorTable>>,
}

impl ZoneHandle {
    /// The zone this handle controls.
    pub const fn zone_id(&self) -> &ZoneId {
        &self.zone_id
    }

    /// Queue a manual command for the next decision cycle.
    ///
    /// Validation against the declared actuators happens in the decision
    /// loop; rejections there are logged.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::WrongZone`], [`CommandError::InboxFull`] or
    /// [`CommandError::ZoneStopped`].
    pub fn submit(&self, command: Command) -> Result<(), CommandError> {
        if command.zone_id != self.zone_id {
            return Err(CommandError::WrongZone {
                expected: self.zone_id.clone(),
                got: command.zone_id,
            });
        }
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => CommandError::InboxFull(self.zone_id.clone()),
            mpsc::error::TrySendError::Closed(_) => {
                CommandError::ZoneStopped(self.zone_id.clone())
            }
        })
    }

    /// Swap in a new configuration if it is valid.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the previous configuration stays.
    pub fn reload(&self, config: ZoneConfig) -> Result<bool, ConfigError> {
        self.config.reload(config)
    }

    /// The latest published actuator table.
    pub fn actuators(&self) -> Arc<ActuatorTable> {
        Arc::clone(&self.actuators.borrow())
    }

    /// The zone's configuration handle.
    pub const fn config(&self) -> &ConfigHandle {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// What one zone did before it stopped.
#[derive(Debug, Clone)]
pub struct ZoneSummary {
    /// The zone.
    pub zone_id: ZoneId,
    /// Simulation ticks completed.
    pub ticks: u64,
    /// Analysis cycles run.
    pub analysis_cycles: u64,
    /// Decision cycles run.
    pub decision_cycles: u64,
    /// Plans handed to the executor.
    pub plans_issued: u64,
    /// Physical state at the end.
    pub final_state: EnvironmentState,
    /// Actuator table at the end.
    pub actuators: Arc<ActuatorTable>,
}

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// One summary per zone, ordered by zone id.
    pub zones: Vec<ZoneSummary>,
}

/// Log the end of a run.
pub fn log_run_end(summary: &RunSummary) {
    info!(
        reason = ?summary.end_reason,
        zones = summary.zones.len(),
        "Run ended"
    );
    for zone in &summary.zones {
        info!(
            zone = %zone.zone_id,
            ticks = zone.ticks,
            analysis_cycles = zone.analysis_cycles,
            decision_cycles = zone.decision_cycles,
            plans_issued = zone.plans_issued,
            temperature_c = zone.final_state.temperature_c,
            co2_ppm = zone.final_state.co2_ppm,
            nh3_ppm = zone.final_state.nh3_ppm,
            "Zone summary"
        );
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Running zone task groups.
#[derive(Debug)]
pub struct ZoneRuntime {
    handles: Vec<ZoneHandle>,
    tasks: JoinSet<Result<ZoneSummary, RunnerError>>,
}

impl ZoneRuntime {
    /// Handles of every zone, in configuration order.
    pub fn handles(&self) -> &[ZoneHandle] {
        &self.handles
    }

    /// The handle of one zone.
    pub fn handle(&self, zone_id: &ZoneId) -> Option<&ZoneHandle> {
        self.handles.iter().find(|h| &h.zone_id == zone_id)
    }

    /// Wait for every zone to stop.
    ///
    /// A failing zone requests a stop of all others; the first error is
    /// returned once every task has ended.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunnerError`] raised by a zone.
    pub async fn join(mut self, operator: &OperatorState) -> Result<RunSummary, RunnerError> {
        let mut zones = Vec::with_capacity(self.handles.len());
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            match joined.map_err(RunnerError::from).and_then(|r| r) {
                Ok(summary) => zones.push(summary),
                Err(err) => {
                    warn!(error = %err, "zone stopped with an error, stopping all zones");
                    operator.request_stop();
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let reason = if operator.is_stop_requested() {
            RunEndReason::OperatorStop
        } else {
            RunEndReason::MaxTicksReached
        };
        operator.set_end_reason(reason).await;
        zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        Ok(RunSummary {
            end_reason: operator.end_reason().await.unwrap_or(reason),
            zones,
        })
    }
}

/// Start every configured zone.
///
/// # Errors
///
/// Returns [`RunnerError`] if a zone's configuration or clock is invalid.
/// Nothing is spawned in that case.
pub fn spawn_zones(
    config: &ControllerConfig,
    operator: &Arc<OperatorState>,
    sinks: &Sinks,
) -> Result<ZoneRuntime, RunnerError> {
    config.validate()?;
    let engine = &config.engine;
    let mut prepared = Vec::with_capacity(config.zones.len());

    for (index, zone) in config.zones.iter().enumerate() {
        let handle = ConfigHandle::new(zone.clone())?;
        let seed = engine
            .seed
            .wrapping_add(u64::try_from(index).unwrap_or(u64::MAX));
        let simulation = SimulationStage::new(zone, engine, seed)?;
        let decision = DecisionStage::new(zone, simulation.clock().now());
        prepared.push((handle, simulation, decision));
    }

    let mut handles = Vec::with_capacity(prepared.len());
    let mut tasks = JoinSet::new();

    for (config_handle, simulation, decision) in prepared {
        let zone_id = config_handle.zone_id();
        let (commands_tx, commands_rx) = mpsc::channel(engine.command_capacity.max(1));
        let (tables_tx, tables_rx) = watch::channel(decision.table());

        handles.push(ZoneHandle {
            zone_id: zone_id.clone(),
            commands: commands_tx,
            config: config_handle.clone(),
            actuators: tables_rx.clone(),
        });

        let task = ZoneTask {
            zone_id,
            config: config_handle,
            simulation,
            decision,
            commands: commands_rx,
            tables_tx,
            tables_rx,
            operator: Arc::clone(operator),
            sinks: sinks.clone(),
            analysis_interval: Duration::from_millis(engine.analysis_interval_ms.max(1)),
            heartbeat_cycles: engine.heartbeat_cycles,
        };
        tasks.spawn(run_zone(task));
    }

    info!(
        zones = handles.len(),
        tick_interval_ms = operator.tick_interval_ms(),
        max_ticks = operator.max_ticks(),
        "Zones started"
    );
    Ok(ZoneRuntime { handles, tasks })
}

/// Convenience wrapper: spawn every zone and wait for the run to end.
///
/// # Errors
///
/// Returns [`RunnerError`] from spawning or from any zone.
pub async fn run_zones(
    config: &ControllerConfig,
    operator: &Arc<OperatorState>,
    sinks: &Sinks,
) -> Result<RunSummary, RunnerError> {
    spawn_zones(config, operator, sinks)?.join(operator).await
}

// ---------------------------------------------------------------------------
// Zone task
// ---------------------------------------------------------------------------

/// Everything one zone's task group owns.
struct ZoneTask {
    zone_id: ZoneId,
    config: ConfigHandle,
    simulation: SimulationStage,
    decision: DecisionStage,
    commands: mpsc::Receiver<Command>,
    tables_tx: watch::Sender<Arc<ActuatorTable>>,
    tables_rx: watch::Receiver<Arc<ActuatorTable>>,
    operator: Arc<OperatorState>,
    sinks: Sinks,
    analysis_interval: Duration,
    heartbeat_cycles: u64,
}

async fn run_zone(task: ZoneTask) -> Result<ZoneSummary, RunnerError> {
    let ZoneTask {
        zone_id,
        config,
        simulation,
        decision,
        commands,
        tables_tx,
        tables_rx,
        operator,
        sinks,
        analysis_interval,
        heartbeat_cycles,
    } = task;

    let (readings_tx, readings_rx) = watch::channel(None);
    let (statuses_tx, statuses_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
    let analysis = AnalysisStage::new(zone_id.clone());

    info!(zone = %zone_id, "Zone loop starting");

    let (simulated, analysed, decided) = tokio::join!(
        simulation_loop(
            simulation,
            config.clone(),
            tables_rx,
            readings_tx,
            Arc::clone(&operator),
            Arc::clone(&sinks.knowledge),
        ),
        analysis_loop(
            analysis,
            config.clone(),
            readings_rx,
            statuses_tx,
            analysis_interval,
            Arc::clone(&sinks.knowledge),
        ),
        decision_loop(
            decision,
            config,
            statuses_rx,
            commands,
            tables_tx,
            heartbeat_cycles,
            sinks,
        ),
    );

    let simulation = simulated?;
    let (decision, plans_issued) = decided;
    info!(zone = %zone_id, ticks = simulation.clock().tick(), "Zone loop stopped");

    Ok(ZoneSummary {
        zone_id,
        ticks: simulation.clock().tick(),
        analysis_cycles: analysed,
        decision_cycles: decision.cycle(),
        plans_issued,
        final_state: simulation.state().clone(),
        actuators: decision.table(),
    })
}

/// Tick until stopped or the tick bound is reached. Returns the stage so
/// the caller can report its final state.
async fn simulation_loop(
    mut stage: SimulationStage,
    config: ConfigHandle,
    tables: watch::Receiver<Arc<ActuatorTable>>,
    readings: watch::Sender<Option<Arc<ReadingBatch>>>,
    operator: Arc<OperatorState>,
    knowledge: Arc<dyn KnowledgeSink>,
) -> Result<SimulationStage, PipelineError> {
    let mut attempts: u64 = 0;

    loop {
        if operator.is_paused() {
            info!("Simulation paused, waiting for resume...");
            operator.wait_if_paused().await;
            info!("Simulation resumed");
        }
        if operator.is_stop_requested() {
            break;
        }
        if operator.tick_limit_reached(attempts) {
            info!(
                tick = stage.clock().tick(),
                max_ticks = operator.max_ticks(),
                "Tick limit reached"
            );
            break;
        }

        let table = Arc::clone(&tables.borrow());
        let snapshot = config.snapshot();
        attempts = attempts.saturating_add(1);
        match stage.tick(&snapshot, &table) {
            Ok(batch) => {
                knowledge.record_readings(&batch.readings);
                readings.send_replace(Some(Arc::new(batch)));
            }
            // Already logged; the last valid state is kept.
            Err(PipelineError::Physics(_)) => {}
            Err(err @ PipelineError::Clock(_)) => return Err(err),
        }

        let interval = Duration::from_millis(operator.tick_interval_ms());
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = operator.stopped() => {}
        }
    }
    Ok(stage)
}

/// Classify the newest batch on every analysis tick. Returns the number of
/// cycles run. Ends once the simulation loop has dropped its sender.
async fn analysis_loop(
    mut stage: AnalysisStage,
    config: ConfigHandle,
    mut readings: watch::Receiver<Option<Arc<ReadingBatch>>>,
    statuses: mpsc::Sender<StatusBatch>,
    period: Duration,
    knowledge: Arc<dyn KnowledgeSink>,
) -> u64 {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick: u64 = 0;

    loop {
        interval.tick().await;
        let closed = readings.has_changed().is_err();
        let latest = readings.borrow_and_update().clone();

        if let Some(batch) = latest
            && batch.tick > last_tick
        {
            last_tick = batch.tick;
            stage.ingest_batch(&batch);
            let batch = stage.analyze(&config.snapshot(), batch.timestamp);
            knowledge.record_statuses(&batch.reports());
            if statuses.send(batch).await.is_err() {
                break;
            }
        }
        if closed {
            break;
        }
    }
    stage.cycle()
}

/// Decide on every status batch. Returns the stage and the number of
/// plans issued. Ends once the analysis loop has dropped its sender.
async fn decision_loop(
    mut stage: DecisionStage,
    config: ConfigHandle,
    mut statuses: mpsc::Receiver<StatusBatch>,
    mut commands: mpsc::Receiver<Command>,
    tables: watch::Sender<Arc<ActuatorTable>>,
    heartbeat_cycles: u64,
    sinks: Sinks,
) -> (DecisionStage, u64) {
    let mut plans_issued: u64 = 0;

    while let Some(batch) = statuses.recv().await {
        stage.drain(&mut commands);
        let snapshot = config.snapshot();
        let Some(decision) = stage.decide(&batch, &snapshot, heartbeat_cycles) else {
            continue;
        };
        tables.send_replace(stage.table());
        if !decision.plans.is_empty() {
            sinks.plans.publish_plans(&decision.plans);
            sinks.knowledge.record_plans(&decision.plans);
            plans_issued =
                plans_issued.saturating_add(u64::try_from(decision.plans.len()).unwrap_or(u64::MAX));
        }
    }
    (stage, plans_issued)
}
