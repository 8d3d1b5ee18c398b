//! Deterministic outside disturbances.
//!
//! The outside temperature follows a daily cosine peaking at
//! [`OutsideConstants::peak_hour`]; CO2 and humidity are constant. Day and
//! night are derived from the simulated hour. Everything is a pure function
//! of the simulated timestamp, so the same run always sees the same weather.

use chrono::{DateTime, Timelike, Utc};

use crate::constants::OutsideConstants;

/// Seconds in one simulated day.
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Seconds in one hour.
const SECONDS_PER_HOUR: u32 = 3_600;

/// Outside conditions at one simulated instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutsideConditions {
    /// Outside air temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Outside CO2 concentration in ppm.
    pub co2_ppm: f64,
    /// Outside ammonia concentration in ppm (always zero).
    pub nh3_ppm: f64,
    /// Outside relative humidity in percent.
    pub humidity_pct: f64,
    /// Whether the barn lights are on.
    pub is_daytime: bool,
}

/// Evaluate the outside conditions at `timestamp`.
pub fn outside_at(outside: &OutsideConstants, timestamp: DateTime<Utc>) -> OutsideConditions {
    let seconds = timestamp.num_seconds_from_midnight();
    let peak = outside.peak_hour.saturating_mul(SECONDS_PER_HOUR);
    let phase = (f64::from(seconds) - f64::from(peak)) / SECONDS_PER_DAY;
    let temperature_c = outside
        .temperature_amplitude_c
        .mul_add((std::f64::consts::TAU * phase).cos(), outside.mean_temperature_c);

    let hour = timestamp.hour();
    let is_daytime = hour >= outside.day_start_hour && hour < outside.day_end_hour;

    OutsideConditions {
        temperature_c,
        co2_ppm: outside.co2_ppm,
        nh3_ppm: 0.0,
        humidity_pct: outside.humidity_pct,
        is_daytime,
    }
}
