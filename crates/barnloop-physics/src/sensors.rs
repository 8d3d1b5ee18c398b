//! Sensor emulation: turns the simulated state into noisy readings.
//!
//! Noise is uniform within a configured amplitude per metric and drawn from
//! a seeded generator, so a run with the same seed reproduces the same
//! readings. Readings are clamped to the metric's physical range.

use barnloop_types::{EnvironmentState, Metric, Reading, ZoneId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::{MAX_TEMPERATURE_C, MIN_TEMPERATURE_C};

/// Noise amplitude per metric, in the metric's unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorNoise {
    /// Temperature noise, in K.
    pub temperature_c: f64,
    /// CO2 noise, in ppm.
    pub co2_ppm: f64,
    /// NH3 noise, in ppm.
    pub nh3_ppm: f64,
    /// Humidity noise, in %RH.
    pub humidity_pct: f64,
    /// Feed level noise, in percent.
    pub feed_level_pct: f64,
    /// Water level noise, in percent.
    pub water_level_pct: f64,
    /// Activity index noise.
    pub activity: f64,
}

impl Default for SensorNoise {
    fn default() -> Self {
        Self {
            temperature_c: 0.2,
            co2_ppm: 30.0,
            nh3_ppm: 1.0,
            humidity_pct: 1.0,
            feed_level_pct: 0.5,
            water_level_pct: 0.5,
            activity: 0.02,
        }
    }
}

impl SensorNoise {
    /// Noise-free sensors.
    pub const NONE: Self = Self {
        temperature_c: 0.0,
        co2_ppm: 0.0,
        nh3_ppm: 0.0,
        humidity_pct: 0.0,
        feed_level_pct: 0.0,
        water_level_pct: 0.0,
        activity: 0.0,
    };

    /// Amplitude for `metric`, forced finite and non-negative.
    pub fn amplitude(&self, metric: Metric) -> f64 {
        let raw = match metric {
            Metric::Ammonia => self.nh3_ppm,
            Metric::Co2 => self.co2_ppm,
            Metric::Temperature => self.temperature_c,
            Metric::Humidity => self.humidity_pct,
            Metric::WaterLevel => self.water_level_pct,
            Metric::FeedLevel => self.feed_level_pct,
            Metric::Activity => self.activity,
        };
        if raw.is_finite() { raw.abs() } else { 0.0 }
    }
}

/// The sensor set of one zone.
#[derive(Debug, Clone)]
pub struct SensorArray {
    zone_id: ZoneId,
    noise: SensorNoise,
    rng: StdRng,
}

impl SensorArray {
    /// Create a sensor array with a deterministic noise stream.
    pub fn new(zone_id: ZoneId, noise: SensorNoise, seed: u64) -> Self {
        Self {
            zone_id,
            noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Replace the noise amplitudes (after a reconfiguration).
    pub fn set_noise(&mut self, noise: SensorNoise) {
        self.noise = noise;
    }

    /// One reading per metric, timestamped with the state's instant.
    pub fn sample(&mut self, state: &EnvironmentState) -> Vec<Reading> {
        Metric::ALL
            .iter()
            .map(|&metric| {
                let amplitude = self.noise.amplitude(metric);
                let noise = if amplitude > 0.0 {
                    self.rng.random_range(-amplitude..=amplitude)
                } else {
                    0.0
                };
                Reading {
                    zone_id: self.zone_id.clone(),
                    metric,
                    value: clamp_reading(metric, state.value(metric) + noise),
                    timestamp: state.timestamp,
                }
            })
            .collect()
    }
}

fn clamp_reading(metric: Metric, value: f64) -> f64 {
    match metric {
        Metric::Temperature => value.clamp(MIN_TEMPERATURE_C, MAX_TEMPERATURE_C),
        Metric::Ammonia | Metric::Co2 => value.max(0.0),
        Metric::Humidity | Metric::WaterLevel | Metric::FeedLevel => value.clamp(0.0, 100.0),
        Metric::Activity => value.clamp(0.0, 1.0),
    }
}
