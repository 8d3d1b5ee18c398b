//! Physical and biological constants of a zone.
//!
//! All values are validated once by [`ZoneConstants::validate`] when the
//! configuration is loaded; the integrator assumes they hold and never
//! masks a bad constant at runtime.

use serde::{Deserialize, Serialize};

use crate::error::PhysicsError;

/// Complete constant set for one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConstants {
    /// Effective thermal mass of air, litter and structure, in kg.
    pub thermal_mass_kg: f64,
    /// Specific heat of that mass, in J/(kg*K).
    pub specific_heat_j_per_kg_k: f64,
    /// Thermal resistance of the envelope to the outside, in K/W.
    pub insulation_k_per_w: f64,
    /// Air volume of the zone, in m3.
    pub volume_m3: f64,
    /// Number of birds housed.
    pub bird_count: u32,
    /// Feeder capacity, in kg.
    pub feed_capacity_kg: f64,
    /// Drinker capacity, in litres.
    pub water_capacity_l: f64,
    /// Per-bird metabolic rates.
    pub birds: BirdConstants,
    /// Actuator ratings.
    pub actuators: ActuatorConstants,
    /// Outside climate.
    pub outside: OutsideConstants,
}

/// Per-bird metabolic rates at an activity factor of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdConstants {
    /// Sensible heat output, in W.
    pub heat_w: f64,
    /// CO2 generation, in ppm*m3/s.
    pub co2_ppm_m3_per_s: f64,
    /// NH3 generation from litter, in ppm*m3/s.
    pub nh3_ppm_m3_per_s: f64,
    /// Moisture release, in %RH*m3/s.
    pub moisture_pct_m3_per_s: f64,
    /// Feed intake, in kg/s.
    pub feed_kg_per_s: f64,
    /// Water intake, in L/s.
    pub water_l_per_s: f64,
    /// Temperature above which birds drink more and litter releases more
    /// ammonia, in degrees Celsius.
    pub heat_stress_c: f64,
    /// Lower bound of the comfort band, in degrees Celsius.
    pub comfort_min_c: f64,
    /// Upper bound of the comfort band, in degrees Celsius.
    pub comfort_max_c: f64,
}

/// Ratings that translate actuator levels into physical effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConstants {
    /// Heater output at 100 %, in W.
    pub heater_max_w: f64,
    /// Fan air exchange at 100 %, in m3/s.
    pub fan_max_exchange_m3_s: f64,
    /// Inlet air exchange at 100 %, in m3/s.
    pub inlet_max_exchange_m3_s: f64,
    /// Feeder refill speed while the dispenser is ON, in %/s.
    pub feed_refill_pct_per_s: f64,
    /// Drinker refill speed while the valve is ON, in %/s.
    pub water_refill_pct_per_s: f64,
}

/// Outside climate driving the disturbances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutsideConstants {
    /// Daily mean outside temperature, in degrees Celsius.
    pub mean_temperature_c: f64,
    /// Half the daily temperature swing, in K.
    pub temperature_amplitude_c: f64,
    /// Hour of the daily temperature peak (0-23).
    pub peak_hour: u32,
    /// Outside CO2 concentration, in ppm.
    pub co2_ppm: f64,
    /// Outside relative humidity, in percent.
    pub humidity_pct: f64,
    /// Hour at which lights come on (0-23).
    pub day_start_hour: u32,
    /// Hour at which lights go off (1-24).
    pub day_end_hour: u32,
}

impl Default for ZoneConstants {
    fn default() -> Self {
        Self {
            thermal_mass_kg: 5_000.0,
            specific_heat_j_per_kg_k: 1_005.0,
            insulation_k_per_w: 0.002,
            volume_m3: 1_000.0,
            bird_count: 1_000,
            feed_capacity_kg: 150.0,
            water_capacity_l: 250.0,
            birds: BirdConstants::default(),
            actuators: ActuatorConstants::default(),
            outside: OutsideConstants::default(),
        }
    }
}

impl Default for BirdConstants {
    fn default() -> Self {
        Self {
            heat_w: 10.0,
            co2_ppm_m3_per_s: 0.7,
            nh3_ppm_m3_per_s: 0.002,
            moisture_pct_m3_per_s: 0.004,
            feed_kg_per_s: 1.5e-6,
            water_l_per_s: 3.0e-6,
            heat_stress_c: 26.0,
            comfort_min_c: 22.0,
            comfort_max_c: 30.0,
        }
    }
}

impl Default for ActuatorConstants {
    fn default() -> Self {
        Self {
            heater_max_w: 30_000.0,
            fan_max_exchange_m3_s: 10.0,
            inlet_max_exchange_m3_s: 2.0,
            feed_refill_pct_per_s: 1.0,
            water_refill_pct_per_s: 2.0,
        }
    }
}

impl Default for OutsideConstants {
    fn default() -> Self {
        Self {
            mean_temperature_c: 20.0,
            temperature_amplitude_c: 4.0,
            peak_hour: 14,
            co2_ppm: 420.0,
            humidity_pct: 60.0,
            day_start_hour: 6,
            day_end_hour: 20,
        }
    }
}

/// Lowest representable temperature, in degrees Celsius.
pub const ABSOLUTE_ZERO_C: f64 = -273.15;

impl ZoneConstants {
    /// Reject any constant that would make the model ill-posed (division
    /// by zero, negative rates, non-finite values).
    pub fn validate(&self) -> Result<(), PhysicsError> {
        positive("thermal_mass_kg", self.thermal_mass_kg)?;
        positive("specific_heat_j_per_kg_k", self.specific_heat_j_per_kg_k)?;
        positive("insulation_k_per_w", self.insulation_k_per_w)?;
        positive("volume_m3", self.volume_m3)?;
        positive("feed_capacity_kg", self.feed_capacity_kg)?;
        positive("water_capacity_l", self.water_capacity_l)?;
        self.birds.validate()?;
        self.actuators.validate()?;
        self.outside.validate()
    }
}

impl BirdConstants {
    fn validate(&self) -> Result<(), PhysicsError> {
        non_negative("birds.heat_w", self.heat_w)?;
        non_negative("birds.co2_ppm_m3_per_s", self.co2_ppm_m3_per_s)?;
        non_negative("birds.nh3_ppm_m3_per_s", self.nh3_ppm_m3_per_s)?;
        non_negative("birds.moisture_pct_m3_per_s", self.moisture_pct_m3_per_s)?;
        non_negative("birds.feed_kg_per_s", self.feed_kg_per_s)?;
        non_negative("birds.water_l_per_s", self.water_l_per_s)?;
        above_absolute_zero("birds.heat_stress_c", self.heat_stress_c)?;
        above_absolute_zero("birds.comfort_min_c", self.comfort_min_c)?;
        above_absolute_zero("birds.comfort_max_c", self.comfort_max_c)?;
        if self.comfort_max_c <= self.comfort_min_c {
            return Err(PhysicsError::InvalidConstant {
                name: "birds.comfort_max_c",
                value: self.comfort_max_c,
                reason: "must exceed comfort_min_c",
            });
        }
        Ok(())
    }
}

impl ActuatorConstants {
    fn validate(&self) -> Result<(), PhysicsError> {
        non_negative("actuators.heater_max_w", self.heater_max_w)?;
        non_negative("actuators.fan_max_exchange_m3_s", self.fan_max_exchange_m3_s)?;
        non_negative("actuators.inlet_max_exchange_m3_s", self.inlet_max_exchange_m3_s)?;
        non_negative("actuators.feed_refill_pct_per_s", self.feed_refill_pct_per_s)?;
        non_negative("actuators.water_refill_pct_per_s", self.water_refill_pct_per_s)
    }
}

impl OutsideConstants {
    fn validate(&self) -> Result<(), PhysicsError> {
        above_absolute_zero("outside.mean_temperature_c", self.mean_temperature_c)?;
        non_negative("outside.temperature_amplitude_c", self.temperature_amplitude_c)?;
        above_absolute_zero(
            "outside.min_temperature_c",
            self.mean_temperature_c - self.temperature_amplitude_c,
        )?;
        non_negative("outside.co2_ppm", self.co2_ppm)?;
        percent("outside.humidity_pct", self.humidity_pct)?;
        if self.peak_hour > 23 {
            return Err(PhysicsError::InvalidConstant {
                name: "outside.peak_hour",
                value: f64::from(self.peak_hour),
                reason: "must be an hour of the day (0-23)",
            });
        }
        if self.day_end_hour > 24 || self.day_start_hour >= self.day_end_hour {
            return Err(PhysicsError::InvalidConstant {
                name: "outside.day_end_hour",
                value: f64::from(self.day_end_hour),
                reason: "must be after day_start_hour and at most 24",
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), PhysicsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PhysicsError::InvalidConstant {
            name,
            value,
            reason: "must be finite and greater than zero",
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), PhysicsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PhysicsError::InvalidConstant {
            name,
            value,
            reason: "must be finite and not negative",
        })
    }
}

fn percent(name: &'static str, value: f64) -> Result<(), PhysicsError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(PhysicsError::InvalidConstant {
            name,
            value,
            reason: "must be a percentage (0-100)",
        })
    }
}

fn above_absolute_zero(name: &'static str, value: f64) -> Result<(), PhysicsError> {
    if value.is_finite() && value > ABSOLUTE_ZERO_C {
        Ok(())
    } else {
        Err(PhysicsError::InvalidConstant {
            name,
            value,
            reason: "must be above absolute zero",
        })
    }
}
