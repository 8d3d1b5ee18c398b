//! The three stages of a zone's control loop and their messages.
//!
//! ```text
//! SimulationStage --ReadingBatch--> AnalysisStage --StatusBatch--> DecisionStage
//!        ^                                                              |
//!        +------------------- Arc<ActuatorTable> -----------------------+
//! ```
//!
//! Each stage owns its state and is driven by explicit messages, so the
//! stages can be tested in isolation, chained synchronously by
//! [`ZonePipeline`], or run as independent tasks by the runner.

use std::collections::BTreeMap;
use std::sync::Arc;

use barnloop_physics::{
    PhysicsError, RefillRecommendation, SensorArray, SensorNoise, advance, combined_effect,
    refill_recommendation,
};
use barnloop_types::{
    Command, EnvironmentState, Metric, Override, Reading, StatusReport, Symptom, ZoneId,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::clock::{ClockError, SimClock};
use crate::config::{ConfigHandle, EngineConfig, ZoneConfig};
use crate::decision::{ActuatorTable, Decision, DecisionInput, decide};
use crate::detector::SymptomDetector;
use crate::overrides::{CommandError, OverrideRegistry};

/// Errors raised while advancing a zone.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The integrator rejected the step; the previous state is kept.
    #[error("physics step failed: {0}")]
    Physics(#[from] PhysicsError),

    /// The simulated clock cannot advance further.
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),
}

/// Reasons a reading is dropped by the analysis stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    /// The reading belongs to another zone.
    #[error("reading for zone {got} delivered to zone {expected}")]
    ForeignZone {
        /// The receiving zone.
        expected: ZoneId,
        /// The zone named in the reading.
        got: ZoneId,
    },

    /// The value is NaN or infinite.
    #[error("non-finite {metric} reading: {value}")]
    NonFinite {
        /// The metric.
        metric: Metric,
        /// The rejected value.
        value: f64,
    },
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Readings produced by one simulation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingBatch {
    /// Zone the readings belong to.
    pub zone_id: ZoneId,
    /// Simulation tick that produced them.
    pub tick: u64,
    /// Simulated instant of the readings.
    pub timestamp: DateTime<Utc>,
    /// One reading per metric.
    pub readings: Vec<Reading>,
    /// Refill actuators whose reservoir reached capacity this tick.
    pub refills: Vec<RefillRecommendation>,
}

/// Statuses produced by one analysis cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusBatch {
    /// Zone the statuses belong to.
    pub zone_id: ZoneId,
    /// Analysis cycle number, starting at 1.
    pub cycle: u64,
    /// Simulated instant the statuses describe.
    pub timestamp: DateTime<Utc>,
    /// One symptom per metric with a goal.
    pub symptoms: Vec<Symptom>,
    /// Refill recommendations forwarded from the simulation.
    pub refills: Vec<RefillRecommendation>,
}

impl StatusBatch {
    /// The status output records of this batch.
    pub fn reports(&self) -> Vec<StatusReport> {
        self.symptoms
            .iter()
            .map(|s| StatusReport::from_symptom(self.zone_id.clone(), s, self.timestamp))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Owns the simulated clock, the zone's physical state and its sensors.
#[derive(Debug, Clone)]
pub struct SimulationStage {
    zone_id: ZoneId,
    clock: SimClock,
    state: EnvironmentState,
    sensors: SensorArray,
    noise: SensorNoise,
}

impl SimulationStage {
    /// Start the zone from its configured initial state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Clock`] if the step size is invalid.
    pub fn new(config: &ZoneConfig, engine: &EngineConfig, seed: u64) -> Result<Self, PipelineError> {
        let clock = SimClock::new(engine.start_time, engine.sim_step_s)?;
        Ok(Self {
            zone_id: config.id.clone(),
            state: config.initial.to_state(clock.now()),
            clock,
            sensors: SensorArray::new(config.id.clone(), config.sensors.clone(), seed),
            noise: config.sensors.clone(),
        })
    }

    /// Advance one tick under the actuator levels in `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the integrator or the clock fails. The
    /// clock and the state are unchanged in that case.
    pub fn tick(
        &mut self,
        config: &ZoneConfig,
        table: &ActuatorTable,
    ) -> Result<ReadingBatch, PipelineError> {
        if config.sensors != self.noise {
            self.noise = config.sensors.clone();
            self.sensors.set_noise(self.noise.clone());
        }

        let effect = combined_effect(table.iter(), &config.constants);
        let next = advance(&self.state, &effect, &config.constants, self.clock.step_s())
            .inspect_err(|err| {
                tracing::warn!(zone = %self.zone_id, tick = self.clock.tick(), error = %err, "physics step rejected, keeping last state");
            })?;
        let tick = self.clock.advance()?;
        self.state = EnvironmentState {
            timestamp: self.clock.now(),
            ..next
        };

        let readings = self.sensors.sample(&self.state);
        let refills: Vec<RefillRecommendation> = table
            .iter()
            .filter_map(|actuator| {
                let metric = actuator.kind.refills()?;
                refill_recommendation(actuator, self.state.value(metric))
            })
            .collect();
        for refill in &refills {
            tracing::debug!(
                zone = %self.zone_id,
                actuator = %refill.actuator_id,
                level_pct = refill.level_pct,
                "reservoir full, recommending OFF"
            );
        }

        tracing::trace!(
            zone = %self.zone_id,
            tick,
            temperature_c = self.state.temperature_c,
            co2_ppm = self.state.co2_ppm,
            nh3_ppm = self.state.nh3_ppm,
            "simulation tick"
        );

        Ok(ReadingBatch {
            zone_id: self.zone_id.clone(),
            tick,
            timestamp: self.clock.now(),
            readings,
            refills,
        })
    }

    /// The current physical state.
    pub const fn state(&self) -> &EnvironmentState {
        &self.state
    }

    /// The simulated clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Keeps the latest reading per metric and classifies them on demand.
#[derive(Debug, Clone)]
pub struct AnalysisStage {
    zone_id: ZoneId,
    detector: SymptomDetector,
    latest: BTreeMap<Metric, Reading>,
    refills: Vec<RefillRecommendation>,
    cycle: u64,
}

impl AnalysisStage {
    /// An analysis stage that has seen nothing yet.
    pub const fn new(zone_id: ZoneId) -> Self {
        Self {
            zone_id,
            detector: SymptomDetector::new(),
            latest: BTreeMap::new(),
            refills: Vec::new(),
            cycle: 0,
        }
    }

    /// Accept one reading.
    ///
    /// A non-finite value is rejected and the metric keeps its last valid
    /// reading, which ages out through `max_reading_age_s` as usual. Older
    /// readings never replace newer ones.
    ///
    /// # Errors
    ///
    /// Returns the [`IngestError`] explaining why the reading was dropped.
    pub fn ingest(&mut self, reading: Reading) -> Result<(), IngestError> {
        if reading.zone_id != self.zone_id {
            return Err(IngestError::ForeignZone {
                expected: self.zone_id.clone(),
                got: reading.zone_id,
            });
        }
        if !reading.value.is_finite() {
            return Err(IngestError::NonFinite {
                metric: reading.metric,
                value: reading.value,
            });
        }
        let newer = self
            .latest
            .get(&reading.metric)
            .is_none_or(|held| held.timestamp <= reading.timestamp);
        if newer {
            self.latest.insert(reading.metric, reading);
        }
        Ok(())
    }

    /// Accept every reading of `batch`, logging the rejected ones.
    ///
    /// Returns the number of accepted readings.
    pub fn ingest_batch(&mut self, batch: &ReadingBatch) -> usize {
        let mut accepted: usize = 0;
        for reading in &batch.readings {
            match self.ingest(reading.clone()) {
                Ok(()) => accepted = accepted.saturating_add(1),
                Err(err) => {
                    tracing::warn!(zone = %self.zone_id, tick = batch.tick, error = %err, "reading dropped");
                }
            }
        }
        self.refills.clone_from(&batch.refills);
        accepted
    }

    /// Classify the latest readings at `now`.
    pub fn analyze(&mut self, config: &ZoneConfig, now: DateTime<Utc>) -> StatusBatch {
        self.cycle = self.cycle.saturating_add(1);
        let symptoms =
            self.detector
                .classify_all(&config.goals, &self.latest, &config.detector, now);
        StatusBatch {
            zone_id: self.zone_id.clone(),
            cycle: self.cycle,
            timestamp: now,
            symptoms,
            refills: std::mem::take(&mut self.refills),
        }
    }

    /// Cycles analysed so far.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The symptom detector.
    pub const fn detector(&self) -> &SymptomDetector {
        &self.detector
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Owns the actuator table and the override registry.
#[derive(Debug, Clone)]
pub struct DecisionStage {
    zone_id: ZoneId,
    table: Arc<ActuatorTable>,
    overrides: OverrideRegistry,
    cycle: u64,
    now: DateTime<Utc>,
}

impl DecisionStage {
    /// Declare every configured actuator at rest under AUTO.
    pub fn new(config: &ZoneConfig, now: DateTime<Utc>) -> Self {
        Self {
            zone_id: config.id.clone(),
            table: Arc::new(ActuatorTable::from_config(config, now)),
            overrides: OverrideRegistry::new(),
            cycle: 0,
            now,
        }
    }

    /// Validate and register a manual command at the latest simulated
    /// instant seen.
    ///
    /// # Errors
    ///
    /// Returns the [`CommandError`] if the command is rejected.
    pub fn submit(&mut self, command: &Command) -> Result<Override, CommandError> {
        self.overrides
            .submit(&self.zone_id, command, &self.table.kinds(), self.now)
    }

    /// Register every queued command. Returns how many were accepted.
    pub fn drain(&mut self, inbox: &mut mpsc::Receiver<Command>) -> usize {
        let mut accepted: usize = 0;
        while let Ok(command) = inbox.try_recv() {
            match self.submit(&command) {
                Ok(_) => accepted = accepted.saturating_add(1),
                Err(err) => {
                    tracing::warn!(zone = %self.zone_id, actuator = %command.actuator_id, error = %err, "command rejected");
                }
            }
        }
        accepted
    }

    /// Run one decision cycle and publish the new table.
    ///
    /// Returns `None` when `statuses` belongs to a cycle already decided, so
    /// re-delivered batches never act twice.
    pub fn decide(
        &mut self,
        statuses: &StatusBatch,
        config: &ZoneConfig,
        heartbeat_cycles: u64,
    ) -> Option<Decision> {
        if statuses.cycle <= self.cycle {
            tracing::debug!(zone = %self.zone_id, cycle = statuses.cycle, "status batch already decided");
            return None;
        }
        self.cycle = statuses.cycle;
        self.now = self.now.max(statuses.timestamp);

        let mut table = ActuatorTable::clone(&self.table);
        table.sync(config, self.now);
        let declared = table.kinds();
        self.overrides.retain_declared(&declared);
        for expired in self.overrides.expire(self.now) {
            tracing::info!(
                zone = %self.zone_id,
                actuator = %expired.actuator_id,
                command_id = %expired.command_id,
                "override expired, reverting to automatic control"
            );
        }

        let symptoms: BTreeMap<Metric, Symptom> = statuses
            .symptoms
            .iter()
            .map(|s| (s.metric, s.clone()))
            .collect();
        let decision = decide(&DecisionInput {
            cycle: self.cycle,
            now: self.now,
            config,
            symptoms: &symptoms,
            actuators: &table,
            overrides: &self.overrides,
            refills: &statuses.refills,
            heartbeat_cycles,
        });
        self.table = Arc::new(table.apply(&decision, self.now));

        for plan in &decision.plans {
            tracing::debug!(
                zone = %self.zone_id,
                actuator = %plan.actuator_id,
                target = %plan.target_level,
                reason = ?plan.reason,
                cycle = plan.cycle,
                "plan"
            );
        }
        Some(decision)
    }

    /// The published actuator table.
    pub fn table(&self) -> Arc<ActuatorTable> {
        Arc::clone(&self.table)
    }

    /// Active overrides.
    pub const fn overrides(&self) -> &OverrideRegistry {
        &self.overrides
    }

    /// Last decided cycle.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }
}

// ---------------------------------------------------------------------------
// Synchronous pipeline
// ---------------------------------------------------------------------------

/// Everything one synchronous cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// Simulated readings.
    pub readings: ReadingBatch,
    /// Classified statuses.
    pub statuses: StatusBatch,
    /// The decision, absent only if the cycle was already decided.
    pub decision: Option<Decision>,
}

/// One zone's stages chained in-line: simulate, analyse, decide.
#[derive(Debug)]
pub struct ZonePipeline {
    config: ConfigHandle,
    simulation: SimulationStage,
    analysis: AnalysisStage,
    decision: DecisionStage,
    heartbeat_cycles: u64,
}

impl ZonePipeline {
    /// Build a pipeline for the zone behind `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the simulated clock cannot be built.
    pub fn new(config: ConfigHandle, engine: &EngineConfig, seed: u64) -> Result<Self, PipelineError> {
        let snapshot = config.snapshot();
        let simulation = SimulationStage::new(&snapshot, engine, seed)?;
        let decision = DecisionStage::new(&snapshot, simulation.clock().now());
        Ok(Self {
            analysis: AnalysisStage::new(snapshot.id.clone()),
            simulation,
            decision,
            config,
            heartbeat_cycles: engine.heartbeat_cycles,
        })
    }

    /// Run one full cycle against the current configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the simulation step fails.
    pub fn run_cycle(&mut self) -> Result<CycleOutput, PipelineError> {
        let config = self.config.snapshot();
        let readings = self.simulation.tick(&config, &self.decision.table())?;
        self.analysis.ingest_batch(&readings);
        let statuses = self.analysis.analyze(&config, readings.timestamp);
        let decision = self
            .decision
            .decide(&statuses, &config, self.heartbeat_cycles);
        Ok(CycleOutput {
            readings,
            statuses,
            decision,
        })
    }

    /// Register a manual command.
    ///
    /// # Errors
    ///
    /// Returns the [`CommandError`] if the command is rejected.
    pub fn submit(&mut self, command: &Command) -> Result<Override, CommandError> {
        self.decision.submit(command)
    }

    /// The configuration handle.
    pub const fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The current physical state.
    pub const fn state(&self) -> &EnvironmentState {
        self.simulation.state()
    }

    /// The current actuator table.
    pub fn table(&self) -> Arc<ActuatorTable> {
        self.decision.table()
    }

    /// The decision stage.
    pub const fn decision(&self) -> &DecisionStage {
        &self.decision
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use barnloop_types::{ActuatorId, ActuatorLevel, CommandAction, Status};
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn reading(zone: &str, metric: Metric, value: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            zone_id: ZoneId::from(zone),
            metric,
            value,
            timestamp: at,
        }
    }

    #[test]
    fn foreign_and_non_finite_readings_are_rejected() {
        let mut stage = AnalysisStage::new(ZoneId::from("zone1"));
        assert!(matches!(
            stage.ingest(reading("zone2", Metric::Co2, 1_000.0, t0())),
            Err(IngestError::ForeignZone { .. })
        ));

        stage
            .ingest(reading("zone1", Metric::Temperature, 26.0, t0()))
            .unwrap();
        assert!(matches!(
            stage.ingest(reading("zone1", Metric::Temperature, f64::NAN, t0())),
            Err(IngestError::NonFinite { .. })
        ));

        let batch = stage.analyze(&ZoneConfig::default(), t0());
        let temp = batch
            .symptoms
            .iter()
            .find(|s| s.metric == Metric::Temperature)
            .unwrap();
        assert_eq!(temp.measured, Some(26.0));
        assert_eq!(temp.status, Status::Normal);
    }

    #[test]
    fn rejected_reading_keeps_status_and_hysteresis() {
        let config = ZoneConfig::default();
        let mut stage = AnalysisStage::new(ZoneId::from("zone1"));
        let temperature = |stage: &mut AnalysisStage, at| {
            stage
                .analyze(&config, at)
                .symptoms
                .into_iter()
                .find(|s| s.metric == Metric::Temperature)
                .unwrap()
                .status
        };

        stage
            .ingest(reading("zone1", Metric::Temperature, 27.5, t0()))
            .unwrap();
        assert_eq!(temperature(&mut stage, t0()), Status::Warning);

        let t1 = t0() + TimeDelta::seconds(1);
        let rejected = stage.ingest(reading("zone1", Metric::Temperature, f64::NAN, t1));
        assert!(matches!(rejected, Err(IngestError::NonFinite { .. })));
        assert_eq!(temperature(&mut stage, t1), Status::Warning);

        // |error| = 0.95 is inside the exit margin, so WARNING is held.
        let t2 = t0() + TimeDelta::seconds(2);
        stage
            .ingest(reading("zone1", Metric::Temperature, 26.95, t2))
            .unwrap();
        assert_eq!(temperature(&mut stage, t2), Status::Warning);
    }

    #[test]
    fn older_readings_do_not_replace_newer() {
        let mut stage = AnalysisStage::new(ZoneId::from("zone1"));
        let later = t0() + TimeDelta::seconds(5);
        stage
            .ingest(reading("zone1", Metric::Temperature, 28.0, later))
            .unwrap();
        stage
            .ingest(reading("zone1", Metric::Temperature, 26.0, t0()))
            .unwrap();
        let batch = stage.analyze(&ZoneConfig::default(), later);
        let temp = batch
            .symptoms
            .iter()
            .find(|s| s.metric == Metric::Temperature)
            .unwrap();
        assert_eq!(temp.measured, Some(28.0));
        assert_eq!(batch.cycle, 1);
        assert_eq!(batch.reports().len(), batch.symptoms.len());
    }

    #[test]
    fn decision_stage_ignores_redelivered_batches() {
        let config = ZoneConfig::default();
        let mut stage = DecisionStage::new(&config, t0());
        let batch = StatusBatch {
            zone_id: config.id.clone(),
            cycle: 1,
            timestamp: t0(),
            symptoms: Vec::new(),
            refills: Vec::new(),
        };
        assert!(stage.decide(&batch, &config, 0).is_some());
        assert!(stage.decide(&batch, &config, 0).is_none());
        assert_eq!(stage.cycle(), 1);
    }

    #[test]
    fn drain_registers_queued_commands() {
        let config = ZoneConfig::default();
        let mut stage = DecisionStage::new(&config, t0());
        let (tx, mut rx) = mpsc::channel(4);
        let good = Command {
            zone_id: config.id.clone(),
            actuator_id: ActuatorId::from("fan"),
            action: CommandAction::Set,
            level: Some(55.0),
            ttl_s: 30,
        };
        let bad = Command {
            action: CommandAction::On,
            ..good.clone()
        };
        tx.try_send(good).unwrap();
        tx.try_send(bad).unwrap();
        assert_eq!(stage.drain(&mut rx), 1);
        assert_eq!(stage.overrides().len(), 1);

        let batch = StatusBatch {
            zone_id: config.id.clone(),
            cycle: 1,
            timestamp: t0(),
            symptoms: Vec::new(),
            refills: Vec::new(),
        };
        let decision = stage.decide(&batch, &config, 0).unwrap();
        assert_eq!(decision.plans.len(), 1);
        let fan = stage.table();
        let fan = fan.get(&ActuatorId::from("fan")).unwrap();
        assert_eq!(fan.level, ActuatorLevel::Percent(55.0));
    }

    #[test]
    fn simulation_tick_advances_clock_and_samples_every_metric() {
        let config = ZoneConfig::default();
        let engine = EngineConfig::default();
        let mut stage = SimulationStage::new(&config, &engine, 7).unwrap();
        let table = ActuatorTable::from_config(&config, engine.start_time);
        let batch = stage.tick(&config, &table).unwrap();
        assert_eq!(batch.tick, 1);
        assert_eq!(batch.readings.len(), Metric::ALL.len());
        assert_eq!(
            batch.timestamp.signed_duration_since(engine.start_time),
            TimeDelta::seconds(5)
        );
        assert!(batch.readings.iter().all(|r| r.timestamp == batch.timestamp));
        assert_eq!(stage.state().timestamp, batch.timestamp);
    }
}
