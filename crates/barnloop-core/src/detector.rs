//! Symptom detector: classifies readings against goals with hysteresis.
//!
//! Boundaries are exclusive on entry and strict on exit:
//!
//! | From      | To        | Condition                                   |
//! |-----------|-----------|---------------------------------------------|
//! | any       | WARNING   | `abs(e) > band_low`                            |
//! | any       | CRITICAL  | `abs(e) > band_high`                           |
//! | CRITICAL  | WARNING   | `abs(e) < band_high - margin_high`             |
//! | WARNING   | NORMAL    | `abs(e) < band_low - margin_low`               |
//!
//! where each margin is `band * debounce_fraction`. A missing, stale or
//! non-finite reading yields UNKNOWN and forgets the metric's previous
//! status, so the next valid reading is classified afresh.

use std::collections::BTreeMap;

use barnloop_types::{Metric, Reading, Status, Symptom};
use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{DetectorConfig, GoalConfig};

/// Stateful classifier for one zone.
#[derive(Debug, Clone, Default)]
pub struct SymptomDetector {
    /// Last known status per metric.
    memory: BTreeMap<Metric, Status>,
}

impl SymptomDetector {
    /// A detector with no memory.
    pub const fn new() -> Self {
        Self {
            memory: BTreeMap::new(),
        }
    }

    /// Classify one metric's latest reading at `now`.
    pub fn classify(
        &mut self,
        metric: Metric,
        reading: Option<&Reading>,
        goal: &GoalConfig,
        detector: &DetectorConfig,
        now: DateTime<Utc>,
    ) -> Symptom {
        let Some(value) = reading
            .filter(|r| r.metric == metric && is_fresh(r, detector, now))
            .map(|r| r.value)
            .filter(|v| v.is_finite())
        else {
            if self.memory.remove(&metric).is_some() {
                tracing::debug!(%metric, "reading missing or stale, status reset");
            }
            return Symptom::unknown(metric);
        };

        let error = value - goal.setpoint;
        let magnitude = error.abs();
        let raw = escalation(magnitude, goal);
        let held = self
            .memory
            .get(&metric)
            .map_or(Status::Normal, |&previous| {
                retained(previous, magnitude, goal, detector.debounce_fraction)
            });
        let status = if rank(raw) >= rank(held) { raw } else { held };

        if let Some(previous) = self.memory.insert(metric, status)
            && previous != status
        {
            tracing::debug!(%metric, ?previous, ?status, error, "status changed");
        }

        Symptom {
            metric,
            status,
            error: Some(error),
            measured: Some(value),
        }
    }

    /// Classify every metric that has a goal.
    ///
    /// Memory for metrics without a goal is dropped.
    pub fn classify_all(
        &mut self,
        goals: &BTreeMap<Metric, GoalConfig>,
        latest: &BTreeMap<Metric, Reading>,
        detector: &DetectorConfig,
        now: DateTime<Utc>,
    ) -> Vec<Symptom> {
        self.memory.retain(|metric, _| goals.contains_key(metric));
        goals
            .iter()
            .map(|(&metric, goal)| self.classify(metric, latest.get(&metric), goal, detector, now))
            .collect()
    }

    /// The remembered status of `metric`, if any.
    pub fn previous(&self, metric: Metric) -> Option<Status> {
        self.memory.get(&metric).copied()
    }
}

/// Whether `reading` is at most `max_reading_age_s` old at `now`.
///
/// Readings stamped in the future count as fresh.
fn is_fresh(reading: &Reading, detector: &DetectorConfig, now: DateTime<Utc>) -> bool {
    let age = reading.age(now);
    if age <= TimeDelta::zero() {
        return true;
    }
    let Some(age_us) = age.num_microseconds() else {
        return false;
    };
    // Microsecond counts of any realistic age are exactly representable.
    #[allow(clippy::cast_precision_loss)]
    let age_s = age_us as f64 / 1e6;
    age_s <= detector.max_reading_age_s
}

/// Status from magnitude alone, ignoring history.
fn escalation(magnitude: f64, goal: &GoalConfig) -> Status {
    if magnitude > goal.band_high {
        Status::Critical
    } else if magnitude > goal.band_low {
        Status::Warning
    } else {
        Status::Normal
    }
}

/// Lowest status `previous` may fall to at `magnitude`.
fn retained(previous: Status, magnitude: f64, goal: &GoalConfig, fraction: f64) -> Status {
    let exit_high = goal.band_high * (1.0 - fraction);
    let exit_low = goal.band_low * (1.0 - fraction);
    match previous {
        Status::Critical if magnitude >= exit_high => Status::Critical,
        Status::Critical | Status::Warning if magnitude >= exit_low => Status::Warning,
        _ => Status::Normal,
    }
}

const fn rank(status: Status) -> u8 {
    match status.severity() {
        Some(s) => s,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use barnloop_types::ZoneId;
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn goal() -> GoalConfig {
        GoalConfig::new(26.0, 1.0, 2.5, 10.0)
    }

    fn detector() -> DetectorConfig {
        DetectorConfig {
            max_reading_age_s: 30.0,
            debounce_fraction: 0.2,
        }
    }

    fn reading(value: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            zone_id: ZoneId::from("zone1"),
            metric: Metric::Temperature,
            value,
            timestamp: at,
        }
    }

    fn status_of(d: &mut SymptomDetector, value: f64) -> Status {
        d.classify(
            Metric::Temperature,
            Some(&reading(value, t0())),
            &goal(),
            &detector(),
            t0(),
        )
        .status
    }

    #[test]
    fn band_high_boundary_is_exclusive() {
        let mut d = SymptomDetector::new();
        let symptom = d.classify(
            Metric::Temperature,
            Some(&reading(28.5, t0())),
            &goal(),
            &detector(),
            t0(),
        );
        assert_eq!(symptom.status, Status::Warning);
        assert_eq!(symptom.error, Some(2.5));

        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 28.5 + 1e-9), Status::Critical);
    }

    #[test]
    fn band_low_boundary_is_exclusive() {
        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 27.0), Status::Normal);
        assert_eq!(status_of(&mut d, 27.0 + 1e-9), Status::Warning);
    }

    #[test]
    fn negative_errors_escalate_symmetrically() {
        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 23.0), Status::Critical);
    }

    #[test]
    fn oscillating_at_band_low_does_not_flap() {
        let mut d = SymptomDetector::new();
        // Sitting exactly on the boundary and just above it.
        let trace = [27.0, 27.01, 27.0, 27.01, 26.95, 27.01, 26.9];
        let statuses: Vec<Status> = trace.iter().map(|&v| status_of(&mut d, v)).collect();
        let flips = statuses.windows(2).filter(|w| w.first() != w.get(1)).count();
        assert_eq!(flips, 1, "{statuses:?}");
        assert_eq!(statuses.last(), Some(&Status::Warning));
    }

    #[test]
    fn warning_clears_only_past_margin() {
        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 27.5), Status::Warning);
        // margin = 0.2 -> exit below |e| = 0.8
        assert_eq!(status_of(&mut d, 26.85), Status::Warning);
        assert_eq!(status_of(&mut d, 26.8), Status::Warning);
        assert_eq!(status_of(&mut d, 26.79), Status::Normal);
    }

    #[test]
    fn critical_steps_down_through_warning() {
        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 29.0), Status::Critical);
        // exit_high = 2.0
        assert_eq!(status_of(&mut d, 28.2), Status::Critical);
        assert_eq!(status_of(&mut d, 27.9), Status::Warning);
        // Straight to normal from critical once below both margins.
        assert_eq!(status_of(&mut d, 29.0), Status::Critical);
        assert_eq!(status_of(&mut d, 26.0), Status::Normal);
    }

    #[test]
    fn stale_reading_is_unknown_and_resets_memory() {
        let mut d = SymptomDetector::new();
        assert_eq!(status_of(&mut d, 27.5), Status::Warning);

        let old = reading(27.5, t0());
        let later = t0() + TimeDelta::seconds(31);
        let symptom = d.classify(Metric::Temperature, Some(&old), &goal(), &detector(), later);
        assert_eq!(symptom.status, Status::Unknown);
        assert_eq!(symptom.error, None);
        assert_eq!(d.previous(Metric::Temperature), None);

        // Memory was reset: a value inside the margin is now NORMAL.
        assert_eq!(status_of(&mut d, 26.9), Status::Normal);
    }

    #[test]
    fn reading_at_max_age_is_fresh() {
        let mut d = SymptomDetector::new();
        let r = reading(26.0, t0());
        let at_limit = t0() + TimeDelta::seconds(30);
        let symptom = d.classify(Metric::Temperature, Some(&r), &goal(), &detector(), at_limit);
        assert_eq!(symptom.status, Status::Normal);
    }

    #[test]
    fn missing_and_non_finite_readings_are_unknown() {
        let mut d = SymptomDetector::new();
        let none = d.classify(Metric::Temperature, None, &goal(), &detector(), t0());
        assert_eq!(none.status, Status::Unknown);
        let nan = d.classify(
            Metric::Temperature,
            Some(&reading(f64::NAN, t0())),
            &goal(),
            &detector(),
            t0(),
        );
        assert_eq!(nan.status, Status::Unknown);
    }

    #[test]
    fn classify_all_covers_goal_metrics_only() {
        let mut d = SymptomDetector::new();
        let goals = BTreeMap::from([
            (Metric::Temperature, goal()),
            (Metric::Co2, GoalConfig::new(1_500.0, 500.0, 1_000.0, 0.02)),
        ]);
        let latest = BTreeMap::from([(Metric::Temperature, reading(28.0, t0()))]);
        let symptoms = d.classify_all(&goals, &latest, &detector(), t0());
        assert_eq!(symptoms.len(), 2);
        let co2 = symptoms.iter().find(|s| s.metric == Metric::Co2);
        assert_eq!(co2.map(|s| s.status), Some(Status::Unknown));
        let temp = symptoms.iter().find(|s| s.metric == Metric::Temperature);
        assert_eq!(temp.map(|s| s.status), Some(Status::Warning));
    }
}
