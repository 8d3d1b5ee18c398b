//! Actuator effect translator.
//!
//! Converts commanded actuator levels into physical effects. Fan and inlet
//! both contribute to a single air-exchange figure, which the model uses for
//! heat loss, gas removal and humidity removal alike. The translator is pure:
//! it never mutates actuator state. When a refill actuator has filled its
//! reservoir it emits a [`RefillRecommendation`] that the decision engine
//! acts on in its next cycle.

use barnloop_types::{ActuatorId, ActuatorKind, ActuatorLevel, ActuatorState, Metric};

use crate::constants::ZoneConstants;

/// Level in percent at which a reservoir counts as full.
///
/// The model clamps reservoirs to exactly this value, so a refill that
/// outpaces consumption always reaches it.
pub const FULL_LEVEL_PCT: f64 = 100.0;

/// Combined physical effect of one or more actuators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalEffect {
    /// Heat injected into the zone, in W.
    pub heat_w: f64,
    /// Outside air exchanged with the zone, in m3/s.
    pub air_exchange_m3_s: f64,
    /// Feeder refill speed, in %/s.
    pub feed_refill_pct_per_s: f64,
    /// Drinker refill speed, in %/s.
    pub water_refill_pct_per_s: f64,
    /// House lighting, in percent of full brightness.
    pub lighting_pct: f64,
}

impl PhysicalEffect {
    /// No effect at all.
    pub const NONE: Self = Self {
        heat_w: 0.0,
        air_exchange_m3_s: 0.0,
        feed_refill_pct_per_s: 0.0,
        water_refill_pct_per_s: 0.0,
        lighting_pct: 0.0,
    };

    /// Sum two effects.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            heat_w: self.heat_w + other.heat_w,
            air_exchange_m3_s: self.air_exchange_m3_s + other.air_exchange_m3_s,
            feed_refill_pct_per_s: self.feed_refill_pct_per_s + other.feed_refill_pct_per_s,
            water_refill_pct_per_s: self.water_refill_pct_per_s + other.water_refill_pct_per_s,
            lighting_pct: self.lighting_pct + other.lighting_pct,
        }
    }
}

impl Default for PhysicalEffect {
    fn default() -> Self {
        Self::NONE
    }
}

/// Physical effect of a single actuator at its current level.
pub fn effect(actuator: &ActuatorState, constants: &ZoneConstants) -> PhysicalEffect {
    let ratings = &constants.actuators;
    let fraction = actuator.level.as_percent().clamp(0.0, 100.0) / 100.0;
    match actuator.kind {
        ActuatorKind::Fan => PhysicalEffect {
            air_exchange_m3_s: fraction * ratings.fan_max_exchange_m3_s,
            ..PhysicalEffect::NONE
        },
        ActuatorKind::Inlet => PhysicalEffect {
            air_exchange_m3_s: fraction * ratings.inlet_max_exchange_m3_s,
            ..PhysicalEffect::NONE
        },
        ActuatorKind::Heater => PhysicalEffect {
            heat_w: fraction * ratings.heater_max_w,
            ..PhysicalEffect::NONE
        },
        ActuatorKind::Light => PhysicalEffect {
            lighting_pct: fraction * 100.0,
            ..PhysicalEffect::NONE
        },
        ActuatorKind::FeedDispenser => PhysicalEffect {
            feed_refill_pct_per_s: if actuator.level.is_on() {
                ratings.feed_refill_pct_per_s
            } else {
                0.0
            },
            ..PhysicalEffect::NONE
        },
        ActuatorKind::WaterValve => PhysicalEffect {
            water_refill_pct_per_s: if actuator.level.is_on() {
                ratings.water_refill_pct_per_s
            } else {
                0.0
            },
            ..PhysicalEffect::NONE
        },
    }
}

/// Sum of the effects of every actuator in `actuators`.
pub fn combined_effect<'a, I>(actuators: I, constants: &ZoneConstants) -> PhysicalEffect
where
    I: IntoIterator<Item = &'a ActuatorState>,
{
    actuators
        .into_iter()
        .map(|a| effect(a, constants))
        .fold(PhysicalEffect::NONE, PhysicalEffect::combine)
}

/// A recommended OFF transition for a refill actuator whose reservoir is full.
#[derive(Debug, Clone, PartialEq)]
pub struct RefillRecommendation {
    /// The actuator to switch off.
    pub actuator_id: ActuatorId,
    /// The reservoir metric that reached capacity.
    pub metric: Metric,
    /// Level observed when the recommendation was made.
    pub level_pct: f64,
    /// The recommended level (always OFF).
    pub level: ActuatorLevel,
}

/// Recommend switching a refill actuator off once `level_pct` reached
/// capacity. Returns `None` for non-refill actuators, actuators already OFF,
/// and reservoirs not yet full.
pub fn refill_recommendation(
    actuator: &ActuatorState,
    level_pct: f64,
) -> Option<RefillRecommendation> {
    let metric = actuator.kind.refills()?;
    if !actuator.level.is_on() || !level_pct.is_finite() || level_pct < FULL_LEVEL_PCT {
        return None;
    }
    Some(RefillRecommendation {
        actuator_id: actuator.id.clone(),
        metric,
        level_pct,
        level: ActuatorLevel::Switch(false),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn actuator(kind: ActuatorKind, level: ActuatorLevel) -> ActuatorState {
        let mut state = ActuatorState::new(ActuatorId::from("a"), kind, t0());
        state.level = level;
        state
    }

    #[test]
    fn fan_exchange_is_linear_in_level() {
        let constants = ZoneConstants::default();
        let half = effect(&actuator(ActuatorKind::Fan, ActuatorLevel::Percent(50.0)), &constants);
        let full = effect(&actuator(ActuatorKind::Fan, ActuatorLevel::Percent(100.0)), &constants);
        assert!((half.air_exchange_m3_s - 5.0).abs() < 1e-9);
        assert!((full.air_exchange_m3_s - 2.0 * half.air_exchange_m3_s).abs() < 1e-9);
        assert!(full.heat_w.abs() < f64::EPSILON);
    }

    #[test]
    fn heater_scales_rated_wattage() {
        let constants = ZoneConstants::default();
        let e = effect(
            &actuator(ActuatorKind::Heater, ActuatorLevel::Percent(25.0)),
            &constants,
        );
        assert!((e.heat_w - 7_500.0).abs() < 1e-9);
    }

    #[test]
    fn valve_refills_only_while_on() {
        let constants = ZoneConstants::default();
        let on = effect(
            &actuator(ActuatorKind::WaterValve, ActuatorLevel::Switch(true)),
            &constants,
        );
        let off = effect(
            &actuator(ActuatorKind::WaterValve, ActuatorLevel::Switch(false)),
            &constants,
        );
        assert!((on.water_refill_pct_per_s - 2.0).abs() < f64::EPSILON);
        assert!(off.water_refill_pct_per_s.abs() < f64::EPSILON);
        assert!(on.feed_refill_pct_per_s.abs() < f64::EPSILON);
    }

    #[test]
    fn fan_and_inlet_share_one_exchange_figure() {
        let constants = ZoneConstants::default();
        let actuators = [
            actuator(ActuatorKind::Fan, ActuatorLevel::Percent(100.0)),
            actuator(ActuatorKind::Inlet, ActuatorLevel::Percent(50.0)),
            actuator(ActuatorKind::Heater, ActuatorLevel::Percent(10.0)),
        ];
        let total = combined_effect(&actuators, &constants);
        assert!((total.air_exchange_m3_s - 11.0).abs() < 1e-9);
        assert!((total.heat_w - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn full_feeder_with_dispenser_on_recommends_off() {
        let dispenser = actuator(ActuatorKind::FeedDispenser, ActuatorLevel::Switch(true));
        let rec = refill_recommendation(&dispenser, 100.0).unwrap();
        assert_eq!(rec.metric, Metric::FeedLevel);
        assert_eq!(rec.level, ActuatorLevel::Switch(false));
        // The translator leaves the actuator untouched.
        assert_eq!(dispenser.level, ActuatorLevel::Switch(true));
    }

    #[test]
    fn no_recommendation_below_capacity_or_when_off() {
        let on = actuator(ActuatorKind::FeedDispenser, ActuatorLevel::Switch(true));
        let off = actuator(ActuatorKind::FeedDispenser, ActuatorLevel::Switch(false));
        let fan = actuator(ActuatorKind::Fan, ActuatorLevel::Percent(100.0));
        assert!(refill_recommendation(&on, 80.0).is_none());
        assert!(refill_recommendation(&off, 100.0).is_none());
        assert!(refill_recommendation(&fan, 100.0).is_none());
        assert!(refill_recommendation(&on, f64::NAN).is_none());
    }

    #[test]
    fn recommendation_fires_only_at_capacity() {
        let on = actuator(ActuatorKind::WaterValve, ActuatorLevel::Switch(true));
        assert!(refill_recommendation(&on, 99.5).is_none());
        assert!(refill_recommendation(&on, 99.99).is_none());
        let rec = refill_recommendation(&on, FULL_LEVEL_PCT).unwrap();
        assert_eq!(rec.metric, Metric::WaterLevel);
    }

    #[test]
    fn light_reports_its_brightness() {
        let constants = ZoneConstants::default();
        let e = effect(
            &actuator(ActuatorKind::Light, ActuatorLevel::Percent(40.0)),
            &constants,
        );
        assert!((e.lighting_pct - 40.0).abs() < 1e-9);
        assert!(e.air_exchange_m3_s.abs() < f64::EPSILON);
        assert!(e.heat_w.abs() < f64::EPSILON);
    }
}
