//! Simulated clock for one zone.
//!
//! The clock is the single source of truth for a zone's simulated time. It
//! counts ticks and advances the simulated instant by a fixed step per tick.
//!
//! # Design Principles
//!
//! - All advances use checked arithmetic (no silent overflow).
//! - The step is converted to a [`TimeDelta`] once, so every tick moves the
//!   clock by exactly the same amount as the physics integrator moves the
//!   state timestamp.

use barnloop_physics::model::MAX_ADVANCE_S;
use chrono::{DateTime, TimeDelta, Utc};

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Simulated instant would leave the representable range.
    #[error("simulated time overflow at tick {tick}")]
    TimeOverflow {
        /// Tick at which the overflow happened.
        tick: u64,
    },

    /// Invalid step configuration.
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Tick counter plus simulated instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    /// Ticks completed so far.
    tick: u64,

    /// Simulated instant at tick 0.
    start: DateTime<Utc>,

    /// Current simulated instant.
    now: DateTime<Utc>,

    /// Simulated time covered by one tick.
    step: TimeDelta,

    /// The step in seconds, as handed to the integrator.
    step_s: f64,
}

impl SimClock {
    /// Create a clock starting at `start` that advances `step_s` simulated
    /// seconds per tick.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the step is not finite, not
    /// positive, or longer than the integrator accepts.
    pub fn new(start: DateTime<Utc>, step_s: f64) -> Result<Self, ClockError> {
        if !step_s.is_finite() || step_s <= 0.0 || step_s > MAX_ADVANCE_S {
            return Err(ClockError::InvalidConfig {
                reason: format!("sim_step_s must be in (0, {MAX_ADVANCE_S}], got {step_s}"),
            });
        }
        let step = std::time::Duration::try_from_secs_f64(step_s)
            .ok()
            .and_then(|d| TimeDelta::from_std(d).ok())
            .ok_or_else(|| ClockError::InvalidConfig {
                reason: format!("sim_step_s {step_s} is not representable"),
            })?;
        Ok(Self {
            tick: 0,
            start,
            now: start,
            step,
            step_s,
        })
    }

    /// Advance by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] or [`ClockError::TimeOverflow`];
    /// the clock is unchanged on error.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        let tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        let now = self
            .now
            .checked_add_signed(self.step)
            .ok_or(ClockError::TimeOverflow { tick })?;
        self.tick = tick;
        self.now = now;
        Ok(tick)
    }

    /// Ticks completed so far.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Current simulated instant.
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Simulated instant at tick 0.
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Simulated seconds per tick.
    pub const fn step_s(&self) -> f64 {
        self.step_s
    }

    /// Simulated milliseconds per tick (for logging).
    pub fn step_millis(&self) -> i64 {
        self.step.num_milliseconds()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn advance_moves_by_one_step() {
        let mut clock = SimClock::new(start(), 5.0).unwrap();
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.advance().unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 2);
        assert_eq!(
            clock.now().signed_duration_since(start()),
            TimeDelta::seconds(10)
        );
        assert_eq!(clock.start(), start());
        assert_eq!(clock.step_millis(), 5_000);
    }

    #[test]
    fn fractional_steps_accumulate_exactly() {
        let mut clock = SimClock::new(start(), 0.25).unwrap();
        for _ in 0..8 {
            clock.advance().unwrap();
        }
        assert_eq!(
            clock.now().signed_duration_since(start()),
            TimeDelta::seconds(2)
        );
        assert!((clock.step_s() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_steps_are_rejected() {
        for step in [0.0, -1.0, f64::NAN, f64::INFINITY, MAX_ADVANCE_S * 2.0] {
            assert!(matches!(
                SimClock::new(start(), step),
                Err(ClockError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn time_overflow_leaves_clock_unchanged() {
        let mut clock = SimClock::new(DateTime::<Utc>::MAX_UTC, 1.0).unwrap();
        assert!(matches!(
            clock.advance(),
            Err(ClockError::TimeOverflow { tick: 1 })
        ));
        assert_eq!(clock.tick(), 0);
    }
}
