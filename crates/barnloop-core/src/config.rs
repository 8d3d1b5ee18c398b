//! Configuration loading and typed config structures for barnloop.
//!
//! The canonical configuration lives in `barnloop-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads and validates the file, and the
//! [`ConfigHandle`] that swaps a zone's snapshot atomically on reload.
//!
//! Invalid values (negative gains, inverted thresholds, ill-posed physical
//! constants) are rejected here, at load time, and never reach the control
//! loop.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use barnloop_physics::constants::{ABSOLUTE_ZERO_C, ZoneConstants};
use barnloop_physics::error::PhysicsError;
use barnloop_physics::model::MAX_ADVANCE_S;
use barnloop_physics::sensors::SensorNoise;
use barnloop_types::{ActuatorId, ActuatorKind, EnvironmentState, Metric, ZoneId};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::watch;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A zone's physical constants are ill-posed.
    #[error("zone {zone}: {source}")]
    Physics {
        /// The offending zone.
        zone: String,
        /// The underlying constant error.
        source: PhysicsError,
    },

    /// A value is outside its valid range.
    #[error("invalid config for {scope}: {reason}")]
    Invalid {
        /// Zone id, or `engine` for engine-level settings.
        scope: String,
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

fn invalid(scope: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        scope: scope.to_owned(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Top-level controller configuration.
///
/// Mirrors the structure of `barnloop-config.yaml`. All fields have
/// defaults, so an empty file yields one fully equipped default zone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControllerConfig {
    /// Engine timing and run bounds.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Independent zones.
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
            zones: default_zones(),
        }
    }
}

impl ControllerConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// Environment variables override YAML values:
    /// - `BARNLOOP_LOG_LEVEL` overrides `logging.level`
    /// - `BARNLOOP_MAX_TICKS` overrides `engine.max_ticks`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or a
    /// validation error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or a
    /// validation error.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BARNLOOP_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("BARNLOOP_MAX_TICKS")
            && let Ok(ticks) = val.parse::<u64>()
        {
            self.engine.max_ticks = ticks;
        }
    }

    /// Validate the engine settings and every zone.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.zones.is_empty() {
            return Err(invalid("engine", "at least one zone must be configured"));
        }
        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id.clone()) {
                return Err(invalid(zone.id.as_str(), "duplicate zone id"));
            }
            zone.validate()?;
        }
        Ok(())
    }

    /// Find a zone by id.
    pub fn zone(&self, id: &ZoneId) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| &z.id == id)
    }
}

// ---------------------------------------------------------------------------
// Engine and logging
// ---------------------------------------------------------------------------

/// Engine timing and run bounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Real-time milliseconds between simulation ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated seconds covered by one tick.
    #[serde(default = "default_sim_step_s")]
    pub sim_step_s: f64,

    /// Real-time milliseconds between analysis cycles.
    #[serde(default = "default_analysis_interval_ms")]
    pub analysis_interval_ms: u64,

    /// Stop after this many ticks per zone (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Seed for the sensor noise of the first zone; later zones use
    /// consecutive seeds.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Re-emit every plan every N decision cycles (0 = changes only).
    #[serde(default = "default_heartbeat_cycles")]
    pub heartbeat_cycles: u64,

    /// Real-time milliseconds between config file modification checks.
    #[serde(default = "default_config_reload_interval_ms")]
    pub config_reload_interval_ms: u64,

    /// Simulated instant at tick 0.
    #[serde(default = "default_start_time")]
    pub start_time: DateTime<Utc>,

    /// Capacity of each zone's command inbox.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Bound of the in-memory knowledge history per record kind.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            sim_step_s: default_sim_step_s(),
            analysis_interval_ms: default_analysis_interval_ms(),
            max_ticks: 0,
            seed: default_seed(),
            heartbeat_cycles: default_heartbeat_cycles(),
            config_reload_interval_ms: default_config_reload_interval_ms(),
            start_time: default_start_time(),
            command_capacity: default_command_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.sim_step_s.is_finite() || self.sim_step_s <= 0.0 || self.sim_step_s > MAX_ADVANCE_S
        {
            return Err(invalid(
                "engine",
                format!("sim_step_s must be in (0, {MAX_ADVANCE_S}]"),
            ));
        }
        if self.analysis_interval_ms == 0 {
            return Err(invalid("engine", "analysis_interval_ms must be at least 1"));
        }
        if self.config_reload_interval_ms == 0 {
            return Err(invalid(
                "engine",
                "config_reload_interval_ms must be at least 1",
            ));
        }
        if self.command_capacity == 0 {
            return Err(invalid("engine", "command_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is
    /// unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// Complete configuration of one zone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    /// Zone identifier.
    #[serde(default = "default_zone_id")]
    pub id: ZoneId,

    /// Physical and biological constants.
    #[serde(default)]
    pub constants: ZoneConstants,

    /// State at tick 0.
    #[serde(default)]
    pub initial: InitialState,

    /// Goal per monitored metric.
    #[serde(default = "default_goals")]
    pub goals: BTreeMap<Metric, GoalConfig>,

    /// Declared actuators and their control laws.
    #[serde(default = "default_actuators")]
    pub actuators: Vec<ActuatorConfig>,

    /// Symptom detector settings.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Sensor noise amplitudes.
    #[serde(default)]
    pub sensors: SensorNoise,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            id: default_zone_id(),
            constants: ZoneConstants::default(),
            initial: InitialState::default(),
            goals: default_goals(),
            actuators: default_actuators(),
            detector: DetectorConfig::default(),
            sensors: SensorNoise::default(),
        }
    }
}

impl ZoneConfig {
    /// Reject any value that would make the zone ill-posed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Physics`] for bad constants and
    /// [`ConfigError::Invalid`] for everything else.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scope = self.id.as_str();
        if self.id.is_empty() {
            return Err(invalid("zone", "zone id must not be empty"));
        }
        self.constants
            .validate()
            .map_err(|source| ConfigError::Physics {
                zone: scope.to_owned(),
                source,
            })?;
        self.initial.validate(scope)?;
        self.detector.validate(scope)?;
        for (metric, goal) in &self.goals {
            goal.validate(scope, *metric)?;
        }

        let mut seen = BTreeSet::new();
        for actuator in &self.actuators {
            if actuator.id.is_empty() {
                return Err(invalid(scope, "actuator id must not be empty"));
            }
            if !seen.insert(actuator.id.clone()) {
                return Err(invalid(
                    scope,
                    format!("duplicate actuator id {}", actuator.id),
                ));
            }
            actuator.validate(scope, &self.goals)?;
        }
        for actuator in &self.actuators {
            actuator.validate_floors(scope, self)?;
        }
        Ok(())
    }

    /// Look up an actuator's configuration.
    pub fn actuator(&self, id: &ActuatorId) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| &a.id == id)
    }
}

/// Zone state at tick 0; the timestamp comes from the engine's start time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitialState {
    /// Indoor air temperature in degrees Celsius.
    pub temperature_c: f64,
    /// CO2 concentration in ppm.
    pub co2_ppm: f64,
    /// NH3 concentration in ppm.
    pub nh3_ppm: f64,
    /// Relative humidity in percent.
    pub humidity_pct: f64,
    /// Feeder fill level in percent.
    pub feed_level_pct: f64,
    /// Drinker level in percent.
    pub water_level_pct: f64,
    /// Flock activity in `[0, 1]`.
    pub activity: f64,
}

impl Default for InitialState {
    fn default() -> Self {
        Self {
            temperature_c: 24.0,
            co2_ppm: 1_200.0,
            nh3_ppm: 8.0,
            humidity_pct: 60.0,
            feed_level_pct: 70.0,
            water_level_pct: 70.0,
            activity: 0.5,
        }
    }
}

impl InitialState {
    /// The environment state at `timestamp`.
    pub const fn to_state(&self, timestamp: DateTime<Utc>) -> EnvironmentState {
        EnvironmentState {
            temperature_c: self.temperature_c,
            co2_ppm: self.co2_ppm,
            nh3_ppm: self.nh3_ppm,
            humidity_pct: self.humidity_pct,
            feed_level_pct: self.feed_level_pct,
            water_level_pct: self.water_level_pct,
            activity: self.activity,
            timestamp,
        }
    }

    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        let in_range = self.temperature_c.is_finite()
            && self.temperature_c > ABSOLUTE_ZERO_C
            && self.co2_ppm.is_finite()
            && self.co2_ppm >= 0.0
            && self.nh3_ppm.is_finite()
            && self.nh3_ppm >= 0.0
            && (0.0..=100.0).contains(&self.humidity_pct)
            && (0.0..=100.0).contains(&self.feed_level_pct)
            && (0.0..=100.0).contains(&self.water_level_pct)
            && (0.0..=1.0).contains(&self.activity);
        if in_range {
            Ok(())
        } else {
            Err(invalid(scope, "initial state is outside its physical range"))
        }
    }
}

/// Setpoint, status bands and gain for one metric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GoalConfig {
    /// Desired value.
    pub setpoint: f64,
    /// `|error|` above which the metric is WARNING.
    pub band_low: f64,
    /// `|error|` above which the metric is CRITICAL.
    pub band_high: f64,
    /// Proportional gain, in percent per unit of error per cycle.
    pub kp: f64,
    /// Lowest level a proportional actuator may be driven to on behalf of
    /// this metric.
    #[serde(default)]
    pub min_level: f64,
    /// Highest level a proportional actuator may be driven to on behalf of
    /// this metric.
    #[serde(default = "default_max_level")]
    pub max_level: f64,
}

impl GoalConfig {
    /// A goal with the full 0-100 % clamp range.
    pub const fn new(setpoint: f64, band_low: f64, band_high: f64, kp: f64) -> Self {
        Self {
            setpoint,
            band_low,
            band_high,
            kp,
            min_level: 0.0,
            max_level: 100.0,
        }
    }

    fn validate(&self, scope: &str, metric: Metric) -> Result<(), ConfigError> {
        let finite = [
            self.setpoint,
            self.band_low,
            self.band_high,
            self.kp,
            self.min_level,
            self.max_level,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(invalid(scope, format!("goal {metric}: values must be finite")));
        }
        if self.kp <= 0.0 {
            return Err(invalid(scope, format!("goal {metric}: kp must be positive")));
        }
        if self.band_low < 0.0 || self.band_high <= self.band_low {
            return Err(invalid(
                scope,
                format!("goal {metric}: bands must satisfy 0 <= band_low < band_high"),
            ));
        }
        if self.min_level < 0.0 || self.max_level > 100.0 || self.min_level > self.max_level {
            return Err(invalid(
                scope,
                format!("goal {metric}: levels must satisfy 0 <= min_level <= max_level <= 100"),
            ));
        }
        Ok(())
    }
}

/// Symptom detector settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Readings older than this many simulated seconds are stale.
    pub max_reading_age_s: f64,
    /// De-bounce margin as a fraction of each band: a status only drops
    /// below a band once `|error| < band * (1 - debounce_fraction)`.
    pub debounce_fraction: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_reading_age_s: 30.0,
            debounce_fraction: 0.1,
        }
    }
}

impl DetectorConfig {
    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if !self.max_reading_age_s.is_finite() || self.max_reading_age_s <= 0.0 {
            return Err(invalid(scope, "detector.max_reading_age_s must be positive"));
        }
        if !(0.0..1.0).contains(&self.debounce_fraction) {
            return Err(invalid(scope, "detector.debounce_fraction must be in [0, 1)"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// A declared actuator and the law that drives it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActuatorConfig {
    /// Actuator identifier, unique within the zone.
    pub id: ActuatorId,
    /// Physical kind.
    pub kind: ActuatorKind,
    /// Automatic control law.
    pub control: ControlLaw,
    /// Minimum automatic levels that apply while other actuators run.
    #[serde(default)]
    pub floors: Vec<LevelFloor>,
}

/// A minimum automatic level held while another actuator is on.
///
/// The default fan keeps [`HEATING_MIN_FAN_PCT`] while the heater runs so
/// that the house is never heated without ventilation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelFloor {
    /// The actuator whose running activates the floor.
    pub while_on: ActuatorId,
    /// Lowest automatic level while it runs, in percent.
    pub level: f64,
}

/// Minimum fan level while the heater is on, in percent.
pub const HEATING_MIN_FAN_PCT: f64 = 20.0;

impl ActuatorConfig {
    /// An actuator with no level floors.
    pub const fn new(id: ActuatorId, kind: ActuatorKind, control: ControlLaw) -> Self {
        Self {
            id,
            kind,
            control,
            floors: Vec::new(),
        }
    }

    fn validate_floors(&self, scope: &str, zone: &ZoneConfig) -> Result<(), ConfigError> {
        let id = &self.id;
        if !self.floors.is_empty() && !self.kind.is_continuous() {
            return Err(invalid(
                scope,
                format!("actuator {id}: level floors need a continuous actuator"),
            ));
        }
        for floor in &self.floors {
            if &floor.while_on == id || zone.actuator(&floor.while_on).is_none() {
                return Err(invalid(
                    scope,
                    format!("actuator {id}: floor names unknown actuator {}", floor.while_on),
                ));
            }
            if !floor.level.is_finite() || !(0.0..=100.0).contains(&floor.level) {
                return Err(invalid(
                    scope,
                    format!("actuator {id}: floor level must be in [0, 100]"),
                ));
            }
        }
        Ok(())
    }

    fn validate(
        &self,
        scope: &str,
        goals: &BTreeMap<Metric, GoalConfig>,
    ) -> Result<(), ConfigError> {
        let id = &self.id;
        match &self.control {
            ControlLaw::Proportional { drivers } => {
                if !self.kind.is_continuous() {
                    return Err(invalid(
                        scope,
                        format!("actuator {id}: proportional control needs a continuous actuator"),
                    ));
                }
                if drivers.is_empty() {
                    return Err(invalid(scope, format!("actuator {id}: no drivers")));
                }
                let mut metrics = BTreeSet::new();
                for driver in drivers {
                    if !metrics.insert(driver.metric) {
                        return Err(invalid(
                            scope,
                            format!("actuator {id}: duplicate driver {}", driver.metric),
                        ));
                    }
                    if !goals.contains_key(&driver.metric) {
                        return Err(invalid(
                            scope,
                            format!("actuator {id}: driver {} has no goal", driver.metric),
                        ));
                    }
                }
            }
            ControlLaw::Hysteresis {
                metric,
                low_threshold,
                high_threshold,
            } => {
                if self.kind.is_continuous() {
                    return Err(invalid(
                        scope,
                        format!("actuator {id}: hysteresis control needs an ON/OFF actuator"),
                    ));
                }
                if !low_threshold.is_finite()
                    || !high_threshold.is_finite()
                    || high_threshold <= low_threshold
                {
                    return Err(invalid(
                        scope,
                        format!("actuator {id}: thresholds must satisfy low < high"),
                    ));
                }
                if !goals.contains_key(metric) {
                    return Err(invalid(
                        scope,
                        format!("actuator {id}: monitored metric {metric} has no goal"),
                    ));
                }
            }
            ControlLaw::Manual => {}
        }
        Ok(())
    }
}

/// How the automatic controller drives an actuator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlLaw {
    /// Incremental proportional control of a continuous actuator by one or
    /// more competing metrics.
    Proportional {
        /// Metrics that compete for the actuator.
        drivers: Vec<Driver>,
    },
    /// Two-threshold ON/OFF control of a discrete actuator.
    Hysteresis {
        /// The monitored level.
        metric: Metric,
        /// Switch ON when the level drops below this.
        low_threshold: f64,
        /// Switch OFF when the level rises above this.
        high_threshold: f64,
    },
    /// No automatic control; only overrides move the actuator.
    Manual,
}

/// A metric driving a proportional actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Driver {
    /// The metric.
    pub metric: Metric,
    /// Whether raising the actuator lowers or raises the metric.
    pub direction: Direction,
}

/// Effect of a higher actuator level on a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// More actuator, less metric (fan on temperature).
    Reduce,
    /// More actuator, more metric (heater on temperature).
    Raise,
}

impl Direction {
    /// `+1` for [`Direction::Reduce`], `-1` for [`Direction::Raise`].
    pub const fn sign(self) -> f64 {
        match self {
            Self::Reduce => 1.0,
            Self::Raise => -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

/// Owner of a zone's current configuration snapshot.
///
/// The snapshot is immutable and replaced wholesale: readers hold an
/// `Arc<ZoneConfig>` for the duration of a cycle and never observe a
/// half-applied change.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<ZoneConfig>>>,
}

impl ConfigHandle {
    /// Validate `config` and make it the first snapshot.
    ///
    /// # Errors
    ///
    /// Returns the validation error.
    pub fn new(config: ZoneConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(Self { tx: Arc::new(tx) })
    }

    /// The zone this handle configures.
    pub fn zone_id(&self) -> ZoneId {
        self.tx.borrow().id.clone()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ZoneConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// A receiver notified on every accepted reload.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ZoneConfig>> {
        self.tx.subscribe()
    }

    /// Replace the snapshot if `config` is valid and differs from it.
    ///
    /// Returns `Ok(true)` when swapped, `Ok(false)` when identical. On error
    /// the previous snapshot stays active.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or [`ConfigError::Invalid`] when the
    /// zone id changed.
    pub fn reload(&self, config: ZoneConfig) -> Result<bool, ConfigError> {
        let current = self.snapshot();
        if config.id != current.id {
            let err = invalid(
                current.id.as_str(),
                format!("reload may not rename the zone to {}", config.id),
            );
            tracing::warn!(zone = %current.id, error = %err, "config reload rejected");
            return Err(err);
        }
        if let Err(err) = config.validate() {
            tracing::warn!(zone = %current.id, error = %err, "config reload rejected, keeping previous");
            return Err(err);
        }
        if *current == config {
            return Ok(false);
        }
        self.tx.send_replace(Arc::new(config));
        tracing::info!(zone = %current.id, "zone configuration reloaded");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_sim_step_s() -> f64 {
    5.0
}

const fn default_analysis_interval_ms() -> u64 {
    1000
}

const fn default_seed() -> u64 {
    42
}

const fn default_heartbeat_cycles() -> u64 {
    12
}

const fn default_config_reload_interval_ms() -> u64 {
    2000
}

fn default_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

const fn default_command_capacity() -> usize {
    64
}

const fn default_history_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_zone_id() -> ZoneId {
    ZoneId::from("zone1")
}

const fn default_max_level() -> f64 {
    100.0
}

fn default_zones() -> Vec<ZoneConfig> {
    vec![ZoneConfig::default()]
}

fn default_goals() -> BTreeMap<Metric, GoalConfig> {
    BTreeMap::from([
        (Metric::Ammonia, GoalConfig::new(10.0, 10.0, 15.0, 2.0)),
        (Metric::Co2, GoalConfig::new(1_500.0, 500.0, 1_000.0, 0.02)),
        (Metric::Temperature, GoalConfig::new(26.0, 1.0, 2.5, 10.0)),
        (Metric::Humidity, GoalConfig::new(65.0, 10.0, 20.0, 0.5)),
        (Metric::WaterLevel, GoalConfig::new(70.0, 20.0, 50.0, 1.0)),
        (Metric::FeedLevel, GoalConfig::new(70.0, 20.0, 50.0, 1.0)),
        (Metric::Activity, GoalConfig::new(0.6, 0.3, 0.45, 50.0)),
    ])
}

fn default_actuators() -> Vec<ActuatorConfig> {
    let reduce = |metric| Driver {
        metric,
        direction: Direction::Reduce,
    };
    let raise = |metric| Driver {
        metric,
        direction: Direction::Raise,
    };
    vec![
        ActuatorConfig {
            floors: vec![LevelFloor {
                while_on: ActuatorId::from("heater"),
                level: HEATING_MIN_FAN_PCT,
            }],
            ..ActuatorConfig::new(
                ActuatorId::from("fan"),
                ActuatorKind::Fan,
                ControlLaw::Proportional {
                    drivers: vec![
                        reduce(Metric::Ammonia),
                        reduce(Metric::Co2),
                        reduce(Metric::Temperature),
                        reduce(Metric::Humidity),
                    ],
                },
            )
        },
        ActuatorConfig::new(
            ActuatorId::from("inlet"),
            ActuatorKind::Inlet,
            ControlLaw::Proportional {
                drivers: vec![reduce(Metric::Ammonia), reduce(Metric::Co2)],
            },
        ),
        ActuatorConfig::new(
            ActuatorId::from("heater"),
            ActuatorKind::Heater,
            ControlLaw::Proportional {
                drivers: vec![raise(Metric::Temperature)],
            },
        ),
        ActuatorConfig::new(
            ActuatorId::from("light"),
            ActuatorKind::Light,
            ControlLaw::Proportional {
                drivers: vec![raise(Metric::Activity)],
            },
        ),
        ActuatorConfig::new(
            ActuatorId::from("feeder"),
            ActuatorKind::FeedDispenser,
            ControlLaw::Hysteresis {
                metric: Metric::FeedLevel,
                low_threshold: 30.0,
                high_threshold: 95.0,
            },
        ),
        ActuatorConfig::new(
            ActuatorId::from("water_valve"),
            ActuatorKind::WaterValve,
            ControlLaw::Hysteresis {
                metric: Metric::WaterLevel,
                low_threshold: 40.0,
                high_threshold: 95.0,
            },
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.engine.seed, 42);
        let zone = config.zones.first().unwrap();
        assert_eq!(zone.actuators.len(), 6);
        assert_eq!(zone.goals.len(), Metric::ALL.len());
        let fan = zone.actuator(&ActuatorId::from("fan")).unwrap();
        assert_eq!(fan.floors.len(), 1);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
engine:
  tick_interval_ms: 500
  sim_step_s: 2.5
  analysis_interval_ms: 750
  max_ticks: 100
  seed: 7
  heartbeat_cycles: 0
  config_reload_interval_ms: 1000
  start_time: 2025-06-01T00:00:00Z

logging:
  level: debug

zones:
  - id: broiler-a
    constants:
      bird_count: 500
      insulation_k_per_w: 0.003
      actuators:
        heater_max_w: 20000.0
    initial:
      temperature_c: 28.5
    goals:
      temperature: { setpoint: 26.0, band_low: 1.0, band_high: 2.5, kp: 10.0 }
      feed_level: { setpoint: 70.0, band_low: 20.0, band_high: 50.0, kp: 1.0 }
    actuators:
      - id: fan
        kind: fan
        control:
          type: proportional
          drivers:
            - { metric: temperature, direction: reduce }
      - id: feeder
        kind: feed_dispenser
        control: { type: hysteresis, metric: feed_level, low_threshold: 30.0, high_threshold: 95.0 }
      - id: spare
        kind: inlet
        control: { type: manual }
    detector:
      max_reading_age_s: 12.0
      debounce_fraction: 0.2
    sensors:
      temperature_c: 0.0
";
        let config = ControllerConfig::parse(yaml).unwrap();
        assert_eq!(config.engine.max_ticks, 100);
        assert_eq!(config.engine.heartbeat_cycles, 0);
        assert_eq!(config.logging.level, "debug");
        let zone = config.zone(&ZoneId::from("broiler-a")).unwrap();
        assert_eq!(zone.constants.bird_count, 500);
        assert!((zone.constants.actuators.heater_max_w - 20_000.0).abs() < f64::EPSILON);
        assert!((zone.initial.temperature_c - 28.5).abs() < f64::EPSILON);
        // Unset initial fields keep their defaults.
        assert!((zone.initial.co2_ppm - 1_200.0).abs() < f64::EPSILON);
        assert_eq!(zone.goals.len(), 2);
        assert_eq!(zone.actuators.len(), 3);
        assert_eq!(
            zone.actuator(&ActuatorId::from("spare")).map(|a| &a.control),
            Some(&ControlLaw::Manual)
        );
        assert!((zone.detector.debounce_fraction - 0.2).abs() < f64::EPSILON);
        assert!(zone.sensors.temperature_c.abs() < f64::EPSILON);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = ControllerConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = ControllerConfig::parse("engine:\n  seed: 9\n").unwrap();
        assert_eq!(config.engine.seed, 9);
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.engine.tick_interval_ms, 1000);
    }

    #[test]
    fn negative_gain_is_rejected() {
        let mut zone = ZoneConfig::default();
        if let Some(goal) = zone.goals.get_mut(&Metric::Temperature) {
            goal.kp = -1.0;
        }
        assert!(matches!(zone.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn inverted_bands_are_rejected() {
        let mut zone = ZoneConfig::default();
        if let Some(goal) = zone.goals.get_mut(&Metric::Co2) {
            goal.band_high = goal.band_low;
        }
        assert!(zone.validate().is_err());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut zone = ZoneConfig::default();
        for actuator in &mut zone.actuators {
            if let ControlLaw::Hysteresis {
                low_threshold,
                high_threshold,
                ..
            } = &mut actuator.control
            {
                *low_threshold = 90.0;
                *high_threshold = 10.0;
            }
        }
        assert!(zone.validate().is_err());
    }

    #[test]
    fn zero_insulation_is_a_config_error() {
        let mut zone = ZoneConfig::default();
        zone.constants.insulation_k_per_w = 0.0;
        assert!(matches!(zone.validate(), Err(ConfigError::Physics { .. })));
    }

    #[test]
    fn control_law_must_match_actuator_kind() {
        let mut zone = ZoneConfig::default();
        zone.actuators.push(ActuatorConfig::new(
            ActuatorId::from("odd"),
            ActuatorKind::WaterValve,
            ControlLaw::Proportional {
                drivers: vec![Driver {
                    metric: Metric::Temperature,
                    direction: Direction::Reduce,
                }],
            },
        ));
        assert!(zone.validate().is_err());
    }

    #[test]
    fn floors_must_name_a_declared_actuator_and_a_percent() {
        let floor = |while_on: &str, level| LevelFloor {
            while_on: ActuatorId::from(while_on),
            level,
        };
        let with_fan_floor = |f: LevelFloor| {
            let mut zone = ZoneConfig::default();
            for actuator in &mut zone.actuators {
                if actuator.id.as_str() == "fan" {
                    actuator.floors = vec![f.clone()];
                }
            }
            zone
        };
        assert!(with_fan_floor(floor("heater", 35.0)).validate().is_ok());
        assert!(with_fan_floor(floor("boiler", 20.0)).validate().is_err());
        assert!(with_fan_floor(floor("fan", 20.0)).validate().is_err());
        assert!(with_fan_floor(floor("heater", 120.0)).validate().is_err());

        let mut zone = ZoneConfig::default();
        for actuator in &mut zone.actuators {
            if actuator.id.as_str() == "feeder" {
                actuator.floors = vec![floor("heater", 20.0)];
            }
        }
        assert!(zone.validate().is_err());
    }

    #[test]
    fn floors_parse_from_yaml() {
        let yaml = r"
zones:
  - id: zone1
    actuators:
      - id: fan
        kind: fan
        control:
          type: proportional
          drivers:
            - { metric: temperature, direction: reduce }
        floors:
          - { while_on: heater, level: 25.0 }
      - id: heater
        kind: heater
        control:
          type: proportional
          drivers:
            - { metric: temperature, direction: raise }
";
        let config = ControllerConfig::parse(yaml).unwrap();
        let zone = config.zones.first().unwrap();
        let fan = zone.actuator(&ActuatorId::from("fan")).unwrap();
        assert_eq!(fan.floors.first().map(|f| f.while_on.as_str()), Some("heater"));
        assert!(zone.actuator(&ActuatorId::from("heater")).unwrap().floors.is_empty());
    }

    #[test]
    fn drivers_need_goals() {
        let mut zone = ZoneConfig::default();
        zone.goals.remove(&Metric::Humidity);
        assert!(zone.validate().is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut zone = ZoneConfig::default();
        let copy = zone.actuators.first().cloned().unwrap();
        zone.actuators.push(copy);
        assert!(zone.validate().is_err());

        let config = ControllerConfig {
            zones: vec![ZoneConfig::default(), ZoneConfig::default()],
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reload_keeps_previous_snapshot_on_invalid_config() {
        let handle = ConfigHandle::new(ZoneConfig::default()).unwrap();
        let mut rx = handle.subscribe();

        let mut bad = ZoneConfig::default();
        if let Some(goal) = bad.goals.get_mut(&Metric::Temperature) {
            goal.kp = 0.0;
        }
        assert!(handle.reload(bad).is_err());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*handle.snapshot(), ZoneConfig::default());

        let mut good = ZoneConfig::default();
        if let Some(goal) = good.goals.get_mut(&Metric::Temperature) {
            goal.setpoint = 24.0;
        }
        assert!(handle.reload(good).unwrap());
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert!((seen.goals[&Metric::Temperature].setpoint - 24.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reload_of_identical_config_is_a_no_op() {
        let handle = ConfigHandle::new(ZoneConfig::default()).unwrap();
        let rx = handle.subscribe();
        assert!(!handle.reload(ZoneConfig::default()).unwrap());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn reload_may_not_rename_zone() {
        let handle = ConfigHandle::new(ZoneConfig::default()).unwrap();
        let renamed = ZoneConfig {
            id: ZoneId::from("other"),
            ..ZoneConfig::default()
        };
        assert!(handle.reload(renamed).is_err());
        assert_eq!(handle.zone_id(), ZoneId::from("zone1"));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("barnloop-config.yaml");
        if path.exists() {
            let config = ControllerConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
