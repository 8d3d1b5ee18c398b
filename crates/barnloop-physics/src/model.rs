//! Physical state model: explicit Euler integration of a zone's environment.
//!
//! # Balances
//!
//! | Quantity    | Rate of change                                                        |
//! |-------------|-----------------------------------------------------------------------|
//! | Temperature | `(Q_bio + Q_heater - Q_vent - Q_loss) / (mass * c)`                   |
//! | CO2, NH3    | `(G - exchange * (C - C_out)) / V`                                    |
//! | Humidity    | `(G_moisture - exchange * (H - H_out)) / V`                           |
//! | Feed, water | `refill - consumption`                                                |
//! | Activity    | relaxes toward a comfort-dependent target                             |
//!
//! Bird-driven terms scale with bird count and a metabolic factor of
//! `0.5 + activity`. House lighting offsets the night drop in activity in
//! proportion to its brightness.
//!
//! # Numerics
//!
//! A single call may cover many seconds. The interval is split into
//! sub-steps of at most [`MAX_SUBSTEP_S`], shortened further so that
//! `rate * step` stays below [`STABILITY_FACTOR`] for the stiffest rate in
//! play. Every sub-step clamps the state to its physical range. Invalid
//! input is rejected; the caller keeps its last valid state.

use barnloop_types::EnvironmentState;
use chrono::{DateTime, TimeDelta, Utc};

use crate::constants::ZoneConstants;
use crate::disturbance::{OutsideConditions, outside_at};
use crate::effect::PhysicalEffect;
use crate::error::PhysicsError;

/// Longest sub-step, in seconds.
pub const MAX_SUBSTEP_S: f64 = 1.0;

/// Shortest sub-step, in seconds.
pub const MIN_SUBSTEP_S: f64 = 1e-3;

/// Upper bound of `rate * step` for any first-order term.
pub const STABILITY_FACTOR: f64 = 0.5;

/// Longest interval accepted by a single [`advance`] call, in seconds.
pub const MAX_ADVANCE_S: f64 = 86_400.0;

/// Density of air, in kg/m3.
pub const AIR_DENSITY_KG_M3: f64 = 1.2;

/// Specific heat of air, in J/(kg*K).
pub const AIR_SPECIFIC_HEAT_J_PER_KG_K: f64 = 1_005.0;

/// Rate at which activity relaxes toward its target, per second.
pub const ACTIVITY_RELAX_PER_S: f64 = 0.01;

/// Lowest temperature the model will report, in degrees Celsius.
pub const MIN_TEMPERATURE_C: f64 = -273.0;

/// Highest temperature the model will report, in degrees Celsius.
pub const MAX_TEMPERATURE_C: f64 = 80.0;

/// Relative increase of litter ammonia release per kelvin above the heat
/// stress threshold.
pub const NH3_HEAT_STRESS_GAIN_PER_K: f64 = 0.5;

/// Water intake multiplier under heat stress.
pub const HEAT_STRESS_WATER_FACTOR: f64 = 1.5;

/// Feed intake multiplier when the drinkers are nearly empty.
pub const DRY_FEED_FACTOR: f64 = 0.5;

/// Reservoir level below which birds go without, in percent.
pub const RESERVOIR_LOW_PCT: f64 = 5.0;

/// Baseline flock activity in comfortable daytime conditions.
pub const BASE_ACTIVITY: f64 = 0.7;

/// Activity lost after dark with the house lights off.
pub const NIGHT_ACTIVITY_DROP: f64 = 0.2;

/// CO2 level above which activity drops, in ppm.
pub const BAD_AIR_CO2_PPM: f64 = 2_500.0;

/// NH3 level above which activity drops, in ppm.
pub const BAD_AIR_NH3_PPM: f64 = 35.0;

/// Time derivatives of every state field.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Derivatives {
    temperature: f64,
    co2: f64,
    nh3: f64,
    humidity: f64,
    feed: f64,
    water: f64,
    activity: f64,
}

/// Advance `state` by `dt_s` seconds under `effect`.
///
/// Pure and deterministic: the same inputs always give the same output.
/// `dt_s == 0` returns the input unchanged.
pub fn advance(
    state: &EnvironmentState,
    effect: &PhysicalEffect,
    constants: &ZoneConstants,
    dt_s: f64,
) -> Result<EnvironmentState, PhysicsError> {
    if !dt_s.is_finite() || dt_s < 0.0 || dt_s > MAX_ADVANCE_S {
        return Err(PhysicsError::InvalidTimeStep { dt_s });
    }
    if !state.is_finite() {
        return Err(PhysicsError::NonFiniteState);
    }

    let substep = stable_substep(effect, constants);
    let mut current = state.clone();
    let mut elapsed = 0.0_f64;
    let mut remaining = dt_s;
    let mut steps: u64 = 0;

    while remaining > 0.0 {
        let h = substep.min(remaining);
        let now = offset(state.timestamp, elapsed)?;
        let outside = outside_at(&constants.outside, now);
        let rates = derivatives(&current, effect, constants, &outside);
        current = clamp(euler(&current, &rates, h));
        elapsed += h;
        remaining -= h;
        steps = steps.saturating_add(1);
    }

    if !current.is_finite() {
        return Err(PhysicsError::NonFiniteState);
    }
    current.timestamp = offset(state.timestamp, dt_s)?;

    tracing::trace!(dt_s, substep, steps, "advanced zone state");
    Ok(current)
}

/// Rate at which air exchange removes a well-mixed quantity, per second of
/// the zone volume: `exchange * (level - outside) / volume`.
///
/// Non-decreasing in `exchange` whenever `level >= outside`.
pub fn gas_removal_rate(exchange_m3_s: f64, level: f64, outside_level: f64, volume_m3: f64) -> f64 {
    exchange_m3_s * (level - outside_level) / volume_m3
}

/// Largest sub-step that keeps explicit Euler stable for the stiffest
/// first-order term under `effect`.
pub fn stable_substep(effect: &PhysicalEffect, constants: &ZoneConstants) -> f64 {
    let exchange = effect.air_exchange_m3_s.max(0.0);
    let heat_capacity = constants.thermal_mass_kg * constants.specific_heat_j_per_kg_k;
    let thermal_rate = (exchange * AIR_DENSITY_KG_M3 * AIR_SPECIFIC_HEAT_J_PER_KG_K
        + 1.0 / constants.insulation_k_per_w)
        / heat_capacity;
    let gas_rate = exchange / constants.volume_m3;
    let stiffest = thermal_rate.max(gas_rate).max(ACTIVITY_RELAX_PER_S);

    if stiffest.is_finite() && stiffest > 0.0 {
        (STABILITY_FACTOR / stiffest).clamp(MIN_SUBSTEP_S, MAX_SUBSTEP_S)
    } else {
        MAX_SUBSTEP_S
    }
}

fn derivatives(
    state: &EnvironmentState,
    effect: &PhysicalEffect,
    constants: &ZoneConstants,
    outside: &OutsideConditions,
) -> Derivatives {
    let birds = f64::from(constants.bird_count);
    let rates = &constants.birds;
    let metabolic = 0.5 + state.activity;
    let exchange = effect.air_exchange_m3_s.max(0.0);
    let volume = constants.volume_m3;
    let heat_stress = (state.temperature_c - rates.heat_stress_c).max(0.0);

    // Heat balance.
    let delta_t = state.temperature_c - outside.temperature_c;
    let q_bio = birds * rates.heat_w * metabolic;
    let q_loss = delta_t / constants.insulation_k_per_w;
    let q_vent = exchange * AIR_DENSITY_KG_M3 * AIR_SPECIFIC_HEAT_J_PER_KG_K * delta_t;
    let temperature = (q_bio + effect.heat_w - q_vent - q_loss)
        / (constants.thermal_mass_kg * constants.specific_heat_j_per_kg_k);

    // Gases and moisture.
    let co2 = birds * rates.co2_ppm_m3_per_s * metabolic / volume
        - gas_removal_rate(exchange, state.co2_ppm, outside.co2_ppm, volume);
    let nh3_release = NH3_HEAT_STRESS_GAIN_PER_K.mul_add(heat_stress, 1.0);
    let nh3 = birds * rates.nh3_ppm_m3_per_s * metabolic * nh3_release / volume
        - gas_removal_rate(exchange, state.nh3_ppm, outside.nh3_ppm, volume);
    let humidity = birds * rates.moisture_pct_m3_per_s * metabolic / volume
        - gas_removal_rate(exchange, state.humidity_pct, outside.humidity_pct, volume);

    // Consumption.
    let feed_factor = if state.water_level_pct < RESERVOIR_LOW_PCT {
        DRY_FEED_FACTOR
    } else {
        1.0
    };
    let water_factor = if heat_stress > 0.0 {
        HEAT_STRESS_WATER_FACTOR
    } else {
        1.0
    };
    let feed_use = if state.feed_level_pct > 0.0 {
        birds * rates.feed_kg_per_s * metabolic * feed_factor / constants.feed_capacity_kg * 100.0
    } else {
        0.0
    };
    let water_use = if state.water_level_pct > 0.0 {
        birds * rates.water_l_per_s * metabolic * water_factor / constants.water_capacity_l * 100.0
    } else {
        0.0
    };

    Derivatives {
        temperature,
        co2,
        nh3,
        humidity,
        feed: effect.feed_refill_pct_per_s.max(0.0) - feed_use,
        water: effect.water_refill_pct_per_s.max(0.0) - water_use,
        activity: (activity_target(state, effect, constants, outside) - state.activity)
            * ACTIVITY_RELAX_PER_S,
    }
}

/// Activity the flock drifts toward under the current conditions.
fn activity_target(
    state: &EnvironmentState,
    effect: &PhysicalEffect,
    constants: &ZoneConstants,
    outside: &OutsideConditions,
) -> f64 {
    let birds = &constants.birds;
    let mut target = BASE_ACTIVITY;
    if state.temperature_c < birds.comfort_min_c || state.temperature_c > birds.comfort_max_c {
        target -= 0.3;
    }
    if state.co2_ppm > BAD_AIR_CO2_PPM || state.nh3_ppm > BAD_AIR_NH3_PPM {
        target -= 0.2;
    }
    if state.feed_level_pct < RESERVOIR_LOW_PCT {
        target -= 0.2;
    }
    if state.water_level_pct < RESERVOIR_LOW_PCT {
        target -= 0.2;
    }
    if !outside.is_daytime {
        let lit = effect.lighting_pct.max(0.0).min(100.0) / 100.0;
        target -= NIGHT_ACTIVITY_DROP * (1.0 - lit);
    }
    target.clamp(0.0, 1.0)
}

fn euler(state: &EnvironmentState, rates: &Derivatives, h: f64) -> EnvironmentState {
    EnvironmentState {
        temperature_c: rates.temperature.mul_add(h, state.temperature_c),
        co2_ppm: rates.co2.mul_add(h, state.co2_ppm),
        nh3_ppm: rates.nh3.mul_add(h, state.nh3_ppm),
        humidity_pct: rates.humidity.mul_add(h, state.humidity_pct),
        feed_level_pct: rates.feed.mul_add(h, state.feed_level_pct),
        water_level_pct: rates.water.mul_add(h, state.water_level_pct),
        activity: rates.activity.mul_add(h, state.activity),
        timestamp: state.timestamp,
    }
}

/// Clamp every field to its physical range.
pub fn clamp(state: EnvironmentState) -> EnvironmentState {
    EnvironmentState {
        temperature_c: state.temperature_c.clamp(MIN_TEMPERATURE_C, MAX_TEMPERATURE_C),
        co2_ppm: state.co2_ppm.max(0.0),
        nh3_ppm: state.nh3_ppm.max(0.0),
        humidity_pct: state.humidity_pct.clamp(0.0, 100.0),
        feed_level_pct: state.feed_level_pct.clamp(0.0, 100.0),
        water_level_pct: state.water_level_pct.clamp(0.0, 100.0),
        activity: state.activity.clamp(0.0, 1.0),
        timestamp: state.timestamp,
    }
}

/// `timestamp + seconds`, failing on overflow.
fn offset(timestamp: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>, PhysicsError> {
    std::time::Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|d| TimeDelta::from_std(d).ok())
        .and_then(|d| timestamp.checked_add_signed(d))
        .ok_or(PhysicsError::TimestampOverflow)
}
