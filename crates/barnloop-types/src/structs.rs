//! Core data-model structs: environment state, readings, symptoms,
//! actuator state, overrides, commands and plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActuatorKind, CommandAction, ControlMode, Metric, PlanReason, Status};
use crate::ids::{ActuatorId, CommandId, ZoneId};

/// Tolerance under which two percent levels are considered the same target.
pub const LEVEL_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Continuous physical state of one zone at a simulated instant.
///
/// Only the physics integrator mutates this; every other component reads
/// copies of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EnvironmentState {
    /// Indoor air temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Carbon dioxide concentration in ppm.
    pub co2_ppm: f64,
    /// Ammonia concentration in ppm.
    pub nh3_ppm: f64,
    /// Relative humidity in percent.
    pub humidity_pct: f64,
    /// Feeder fill level in percent of capacity.
    pub feed_level_pct: f64,
    /// Drinker water level in percent of capacity.
    pub water_level_pct: f64,
    /// Flock activity factor in `[0, 1]`.
    pub activity: f64,
    /// Simulated instant this state describes.
    pub timestamp: DateTime<Utc>,
}

impl EnvironmentState {
    /// The value of a monitored metric.
    pub const fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Ammonia => self.nh3_ppm,
            Metric::Co2 => self.co2_ppm,
            Metric::Temperature => self.temperature_c,
            Metric::Humidity => self.humidity_pct,
            Metric::WaterLevel => self.water_level_pct,
            Metric::FeedLevel => self.feed_level_pct,
            Metric::Activity => self.activity,
        }
    }

    /// Whether every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        [
            self.temperature_c,
            self.co2_ppm,
            self.nh3_ppm,
            self.humidity_pct,
            self.feed_level_pct,
            self.water_level_pct,
            self.activity,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Sensing and diagnosis
// ---------------------------------------------------------------------------

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Reading {
    /// Zone the sensor belongs to.
    pub zone_id: ZoneId,
    /// What was measured.
    pub metric: Metric,
    /// Measured value in the metric's unit.
    pub value: f64,
    /// When the value was measured.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Age of the reading relative to `now` (negative if from the future).
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}

/// The diagnosed condition of one metric for one analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Symptom {
    /// The metric diagnosed.
    pub metric: Metric,
    /// Classified severity.
    pub status: Status,
    /// `measured - setpoint`; absent when the status is `Unknown`.
    pub error: Option<f64>,
    /// The measured value behind the classification.
    pub measured: Option<f64>,
}

impl Symptom {
    /// A symptom for a metric without a usable reading.
    pub const fn unknown(metric: Metric) -> Self {
        Self {
            metric,
            status: Status::Unknown,
            error: None,
            measured: None,
        }
    }
}

/// Status output record, one per metric per analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusReport {
    /// Zone the status belongs to.
    pub zone_id: ZoneId,
    /// The metric diagnosed.
    pub metric: Metric,
    /// Classified severity.
    pub status: Status,
    /// `measured - setpoint`, absent when unknown.
    pub error: Option<f64>,
    /// Analysis instant.
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    /// Build the wire record for a symptom.
    pub fn from_symptom(zone_id: ZoneId, symptom: &Symptom, timestamp: DateTime<Utc>) -> Self {
        Self {
            zone_id,
            metric: symptom.metric,
            status: symptom.status,
            error: symptom.error,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Actuation
// ---------------------------------------------------------------------------

/// Commanded level of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActuatorLevel {
    /// Continuous level in percent, `0..=100`.
    Percent(f64),
    /// Discrete ON (`true`) or OFF (`false`).
    Switch(bool),
}

impl ActuatorLevel {
    /// The level expressed in percent (`Switch(true)` is 100 %).
    pub const fn as_percent(self) -> f64 {
        match self {
            Self::Percent(p) => p,
            Self::Switch(true) => 100.0,
            Self::Switch(false) => 0.0,
        }
    }

    /// Whether the actuator is doing anything at all.
    pub fn is_on(self) -> bool {
        match self {
            Self::Percent(p) => p > LEVEL_EPSILON,
            Self::Switch(on) => on,
        }
    }

    /// Resting level for a freshly declared actuator of `kind`.
    pub const fn off_for(kind: ActuatorKind) -> Self {
        if kind.is_continuous() {
            Self::Percent(0.0)
        } else {
            Self::Switch(false)
        }
    }

    /// Whether two levels denote the same target.
    pub fn same_target(self, other: Self) -> bool {
        match (self, other) {
            (Self::Percent(a), Self::Percent(b)) => (a - b).abs() <= LEVEL_EPSILON,
            (Self::Switch(a), Self::Switch(b)) => a == b,
            _ => false,
        }
    }
}

impl core::fmt::Display for ActuatorLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{p:.1}%"),
            Self::Switch(true) => f.write_str("ON"),
            Self::Switch(false) => f.write_str("OFF"),
        }
    }
}

/// A time-limited manual command that pins one actuator's level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Override {
    /// Identifier assigned when the command was accepted.
    pub command_id: CommandId,
    /// The pinned actuator.
    pub actuator_id: ActuatorId,
    /// The requested level.
    pub level: ActuatorLevel,
    /// When the command was accepted.
    pub issued_at: DateTime<Utc>,
    /// First instant at which the override no longer applies.
    pub expires_at: DateTime<Utc>,
}

impl Override {
    /// Whether the override still applies at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> chrono::Duration {
        self.expires_at.signed_duration_since(self.issued_at)
    }
}

/// Runtime state of one declared actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActuatorState {
    /// Actuator identifier.
    pub id: ActuatorId,
    /// Physical kind.
    pub kind: ActuatorKind,
    /// Current effective level.
    pub level: ActuatorLevel,
    /// When `level` last changed.
    pub last_changed: DateTime<Utc>,
    /// Whether automatic control or an override is in charge.
    pub mode: ControlMode,
    /// The override in charge, if any.
    pub active_override: Option<Override>,
}

impl ActuatorState {
    /// A freshly declared actuator, resting and under automatic control.
    pub fn new(id: ActuatorId, kind: ActuatorKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            level: ActuatorLevel::off_for(kind),
            last_changed: now,
            mode: ControlMode::Auto,
            active_override: None,
        }
    }
}

/// Manual command input as received from the surrounding system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Command {
    /// Target zone.
    pub zone_id: ZoneId,
    /// Target actuator.
    pub actuator_id: ActuatorId,
    /// Requested action.
    pub action: CommandAction,
    /// Level for `SET`, ignored otherwise.
    #[serde(default)]
    pub level: Option<f64>,
    /// Time-to-live in seconds.
    pub ttl_s: u64,
}

/// Plan output: the effective target for one actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Plan {
    /// Zone the actuator belongs to.
    pub zone_id: ZoneId,
    /// Target actuator.
    pub actuator_id: ActuatorId,
    /// Level the executor should drive the hardware to.
    pub target_level: ActuatorLevel,
    /// Automatic or override.
    pub reason: PlanReason,
    /// When an override-driven target stops applying.
    pub expires_at: Option<DateTime<Utc>>,
    /// Decision cycle that produced the plan; consumers de-duplicate on
    /// `(zone_id, actuator_id, cycle)`.
    pub cycle: u64,
}
