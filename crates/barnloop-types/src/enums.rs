//! Enumeration types shared by the physics model, the control pipeline and
//! the external collaborators.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// A monitored property of a zone's environment.
///
/// Declaration order is also the safety order used to break ties between
/// competing control demands: air quality first, flock welfare last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Metric {
    /// Ammonia concentration in ppm.
    Ammonia,
    /// Carbon dioxide concentration in ppm.
    Co2,
    /// Indoor air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
    /// Drinker water level in percent of capacity.
    WaterLevel,
    /// Feeder fill level in percent of capacity.
    FeedLevel,
    /// Flock activity index, 0 (resting) to 1 (fully active).
    Activity,
}

impl Metric {
    /// Every metric, in safety order.
    pub const ALL: [Self; 7] = [
        Self::Ammonia,
        Self::Co2,
        Self::Temperature,
        Self::Humidity,
        Self::WaterLevel,
        Self::FeedLevel,
        Self::Activity,
    ];

    /// Tie-break rank: lower is more safety relevant.
    pub const fn safety_rank(self) -> u8 {
        match self {
            Self::Ammonia => 0,
            Self::Co2 => 1,
            Self::Temperature => 2,
            Self::Humidity => 3,
            Self::WaterLevel => 4,
            Self::FeedLevel => 5,
            Self::Activity => 6,
        }
    }

    /// Stable snake-case name used in logs and wire payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ammonia => "ammonia",
            Self::Co2 => "co2",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::WaterLevel => "water_level",
            Self::FeedLevel => "feed_level",
            Self::Activity => "activity",
        }
    }
}

impl core::fmt::Display for Metric {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Classified severity of a single metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Status {
    /// Within the inner band around the setpoint.
    Normal,
    /// Outside the inner band.
    Warning,
    /// Outside the outer band.
    Critical,
    /// No fresh reading available; the decision engine holds its last action.
    Unknown,
}

impl Status {
    /// Numeric severity for ordering known statuses (`Unknown` has none).
    pub const fn severity(self) -> Option<u8> {
        match self {
            Self::Normal => Some(0),
            Self::Warning => Some(1),
            Self::Critical => Some(2),
            Self::Unknown => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Physical kind of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActuatorKind {
    /// Exhaust fan, 0-100 % forced air exchange.
    Fan,
    /// Air inlet flap, 0-100 % natural air exchange.
    Inlet,
    /// Space heater, 0-100 % of its rated wattage.
    Heater,
    /// Feed dispenser, ON/OFF refill of the feeder.
    FeedDispenser,
    /// Water valve, ON/OFF refill of the drinkers.
    WaterValve,
    /// Dimmable house lighting, 0-100 % of full brightness.
    Light,
}

impl ActuatorKind {
    /// Whether the actuator takes a 0-100 % level (otherwise ON/OFF).
    pub const fn is_continuous(self) -> bool {
        matches!(self, Self::Fan | Self::Inlet | Self::Heater | Self::Light)
    }

    /// The supply metric a refill actuator replenishes.
    pub const fn refills(self) -> Option<Metric> {
        match self {
            Self::FeedDispenser => Some(Metric::FeedLevel),
            Self::WaterValve => Some(Metric::WaterLevel),
            Self::Fan | Self::Inlet | Self::Heater | Self::Light => None,
        }
    }
}

/// Control mode of a single actuator.
///
/// The only transitions are `Auto -> Overridden` when an override arrives and
/// `Overridden -> Auto` when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ControlMode {
    /// Level follows the automatic controller.
    #[default]
    Auto,
    /// Level pinned by an unexpired manual override.
    Overridden,
}

/// Why a plan carries its target level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PlanReason {
    /// Computed by the automatic controller.
    Auto,
    /// Copied from an active manual override.
    Override,
}

/// Action requested by a manual command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum CommandAction {
    /// Set a continuous actuator to `level`.
    Set,
    /// Switch a discrete actuator on.
    On,
    /// Switch a discrete actuator off.
    Off,
}
