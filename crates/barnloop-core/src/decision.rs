//! Control decision engine.
//!
//! [`decide`] turns one analysis cycle's symptoms into per-actuator targets.
//! It is a pure function of its [`DecisionInput`]: the same input always
//! yields the same [`Decision`], and nothing is mutated until the caller
//! hands the decision to [`ActuatorTable::apply`].
//!
//! # Control laws
//!
//! - **Proportional** (continuous actuators): every driver with a known
//!   status proposes `current + sign * kp * error`, clamped to the goal's
//!   level bounds and to `0..=100`. The driver with the largest
//!   `abs(kp * error)` wins; ties go to the more safety relevant metric.
//!   With no known driver the actuator holds.
//! - **Hysteresis** (ON/OFF actuators): ON below the low threshold, OFF
//!   above the high threshold, hold in between. A refill recommendation
//!   forces OFF.
//! - **Manual**: hold.
//!
//! A configured level floor then lifts a continuous candidate to its minimum
//! while the named actuator's effective target is on (the fan keeps a
//! minimum while the heater runs). Floors read the targets of this cycle
//! before any floor is applied, so they never chain.
//!
//! An unexpired override replaces the automatic candidate as the effective
//! target. The candidate is still computed and reported.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use barnloop_physics::RefillRecommendation;
use barnloop_types::{
    ActuatorId, ActuatorKind, ActuatorLevel, ActuatorState, ControlMode, Metric, Override, Plan,
    PlanReason, Status, Symptom,
};
use chrono::{DateTime, Utc};

use crate::config::{ControlLaw, Driver, ZoneConfig};
use crate::overrides::OverrideRegistry;

// ---------------------------------------------------------------------------
// Actuator table
// ---------------------------------------------------------------------------

/// Runtime state of every declared actuator of one zone.
///
/// Exactly one entry exists per declared actuator. The table is owned by the
/// decision stage; other stages read published `Arc` snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuatorTable {
    actuators: BTreeMap<ActuatorId, ActuatorState>,
}

impl ActuatorTable {
    /// A table with every actuator of `config` resting under AUTO.
    pub fn from_config(config: &ZoneConfig, now: DateTime<Utc>) -> Self {
        let mut table = Self::default();
        table.sync(config, now);
        table
    }

    /// Bring the table in line with the declared actuators.
    ///
    /// New actuators start at 0 % / OFF under AUTO, removed ones are dropped,
    /// and an actuator whose kind changed is recreated. Returns whether
    /// anything changed.
    pub fn sync(&mut self, config: &ZoneConfig, now: DateTime<Utc>) -> bool {
        let before = self.actuators.len();
        self.actuators
            .retain(|id, state| config.actuator(id).is_some_and(|a| a.kind == state.kind));
        let mut changed = self.actuators.len() != before;

        for declared in &config.actuators {
            if !self.actuators.contains_key(&declared.id) {
                tracing::info!(
                    zone = %config.id,
                    actuator = %declared.id,
                    kind = ?declared.kind,
                    "actuator declared"
                );
                self.actuators.insert(
                    declared.id.clone(),
                    ActuatorState::new(declared.id.clone(), declared.kind, now),
                );
                changed = true;
            }
        }
        changed
    }

    /// A new table with the decision's effective targets in place.
    ///
    /// `last_changed` moves to `now` only for actuators whose level changed.
    /// Actuators the decision does not mention are carried over untouched.
    pub fn apply(&self, decision: &Decision, now: DateTime<Utc>) -> Self {
        let mut next = self.actuators.clone();
        for d in &decision.actuators {
            let Some(state) = next.get_mut(&d.actuator_id) else {
                continue;
            };
            if state.mode != d.mode {
                tracing::info!(
                    actuator = %d.actuator_id,
                    from = ?state.mode,
                    to = ?d.mode,
                    cycle = decision.cycle,
                    "control mode changed"
                );
            }
            if !state.level.same_target(d.effective) {
                state.level = d.effective;
                state.last_changed = now;
            }
            state.mode = d.mode;
            state.active_override.clone_from(&d.active_override);
        }
        Self { actuators: next }
    }

    /// State of one actuator.
    pub fn get(&self, id: &ActuatorId) -> Option<&ActuatorState> {
        self.actuators.get(id)
    }

    /// Every actuator, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &ActuatorState> {
        self.actuators.values()
    }

    /// Declared actuator kinds, as needed to validate commands.
    pub fn kinds(&self) -> BTreeMap<ActuatorId, ActuatorKind> {
        self.actuators
            .iter()
            .map(|(id, state)| (id.clone(), state.kind))
            .collect()
    }

    /// Number of declared actuators.
    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    /// Whether no actuator is declared.
    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Everything one decision cycle reads.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    /// Decision cycle number.
    pub cycle: u64,
    /// Simulated instant of the analysed readings.
    pub now: DateTime<Utc>,
    /// Configuration snapshot for this cycle.
    pub config: &'a ZoneConfig,
    /// Latest symptom per metric.
    pub symptoms: &'a BTreeMap<Metric, Symptom>,
    /// Current actuator levels.
    pub actuators: &'a ActuatorTable,
    /// Active overrides.
    pub overrides: &'a OverrideRegistry,
    /// Refill actuators whose reservoir reached capacity.
    pub refills: &'a [RefillRecommendation],
    /// Emit plans for every actuator on cycles divisible by this (0 = never).
    pub heartbeat_cycles: u64,
}

/// Outcome for one actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorDecision {
    /// The actuator.
    pub actuator_id: ActuatorId,
    /// What automatic control would do.
    pub auto_candidate: ActuatorLevel,
    /// Metric whose correction produced the candidate, if any.
    pub driver: Option<Metric>,
    /// The target actually applied.
    pub effective: ActuatorLevel,
    /// Resulting control mode.
    pub mode: ControlMode,
    /// Why the effective target was chosen.
    pub reason: PlanReason,
    /// Override expiry, when overridden.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the effective target or mode differs from the current state.
    pub changed: bool,
    /// The override in charge, if any.
    pub active_override: Option<Override>,
}

/// Result of one decision cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Decision cycle number.
    pub cycle: u64,
    /// One entry per declared actuator, ordered by id.
    pub actuators: Vec<ActuatorDecision>,
    /// Plans for the executor: changed actuators, or all on a heartbeat.
    pub plans: Vec<Plan>,
}

/// Compute the targets for one cycle.
pub fn decide(input: &DecisionInput<'_>) -> Decision {
    let heartbeat = input
        .cycle
        .checked_rem(input.heartbeat_cycles)
        .is_some_and(|r| r == 0);

    let mut actuators: Vec<ActuatorDecision> = input
        .actuators
        .iter()
        .map(|state| decide_one(input, state))
        .collect();
    apply_floors(input, &mut actuators);

    let plans = actuators
        .iter()
        .filter(|decision| decision.changed || heartbeat)
        .map(|decision| Plan {
            zone_id: input.config.id.clone(),
            actuator_id: decision.actuator_id.clone(),
            target_level: decision.effective,
            reason: decision.reason,
            expires_at: decision.expires_at,
            cycle: input.cycle,
        })
        .collect();

    Decision {
        cycle: input.cycle,
        actuators,
        plans,
    }
}

fn decide_one(input: &DecisionInput<'_>, state: &ActuatorState) -> ActuatorDecision {
    let (auto_candidate, driver) = match input.config.actuator(&state.id).map(|a| &a.control) {
        Some(ControlLaw::Proportional { drivers }) => proportional(input, state, drivers),
        Some(ControlLaw::Hysteresis {
            metric,
            low_threshold,
            high_threshold,
        }) => {
            let refill = input.refills.iter().any(|r| r.actuator_id == state.id);
            let level = if refill {
                ActuatorLevel::Switch(false)
            } else {
                hysteresis(
                    state.level,
                    input.symptoms.get(metric),
                    *low_threshold,
                    *high_threshold,
                )
            };
            (level, Some(*metric))
        }
        Some(ControlLaw::Manual) | None => (state.level, None),
    };

    let active = input
        .overrides
        .get(&state.id)
        .filter(|ov| ov.is_active(input.now));

    let (effective, mode, reason, expires_at) = match active {
        Some(ov) => (
            ov.level,
            ControlMode::Overridden,
            PlanReason::Override,
            Some(ov.expires_at),
        ),
        None => (auto_candidate, ControlMode::Auto, PlanReason::Auto, None),
    };

    ActuatorDecision {
        actuator_id: state.id.clone(),
        auto_candidate,
        driver,
        effective,
        mode,
        reason,
        expires_at,
        changed: !effective.same_target(state.level) || mode != state.mode,
        active_override: active.cloned(),
    }
}

/// Lift automatic candidates to their floors while the named actuators are on.
fn apply_floors(input: &DecisionInput<'_>, decisions: &mut [ActuatorDecision]) {
    let running: BTreeSet<ActuatorId> = decisions
        .iter()
        .filter(|d| d.effective.is_on())
        .map(|d| d.actuator_id.clone())
        .collect();

    for decision in decisions.iter_mut() {
        let Some(floor) = input
            .config
            .actuator(&decision.actuator_id)
            .into_iter()
            .flat_map(|a| &a.floors)
            .filter(|f| running.contains(&f.while_on))
            .map(|f| f.level)
            .reduce(f64::max)
        else {
            continue;
        };
        let ActuatorLevel::Percent(candidate) = decision.auto_candidate else {
            continue;
        };
        if candidate >= floor {
            continue;
        }

        decision.auto_candidate = ActuatorLevel::Percent(floor);
        if decision.mode == ControlMode::Auto {
            decision.effective = decision.auto_candidate;
        }
        decision.changed = input
            .actuators
            .get(&decision.actuator_id)
            .is_none_or(|s| !decision.effective.same_target(s.level) || decision.mode != s.mode);
    }
}

/// Winning proportional candidate across `drivers`.
fn proportional(
    input: &DecisionInput<'_>,
    state: &ActuatorState,
    drivers: &[Driver],
) -> (ActuatorLevel, Option<Metric>) {
    let current = state.level.as_percent();
    let winner = drivers
        .iter()
        .filter_map(|driver| {
            let symptom = input.symptoms.get(&driver.metric)?;
            if symptom.status == Status::Unknown {
                return None;
            }
            let error = symptom.error.filter(|e| e.is_finite())?;
            let goal = input.config.goals.get(&driver.metric)?;
            let demand = goal.kp * error;
            let proposed = demand.mul_add(driver.direction.sign(), current);
            let candidate = bound(proposed, goal.min_level, goal.max_level);
            Some((driver.metric, demand.abs(), candidate))
        })
        .max_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| b.0.safety_rank().cmp(&a.0.safety_rank()))
        });

    match winner {
        Some((metric, _, candidate)) => (ActuatorLevel::Percent(candidate), Some(metric)),
        None => (state.level, None),
    }
}

/// Two-threshold ON/OFF law.
fn hysteresis(
    current: ActuatorLevel,
    symptom: Option<&Symptom>,
    low_threshold: f64,
    high_threshold: f64,
) -> ActuatorLevel {
    let Some(measured) = symptom
        .filter(|s| s.status != Status::Unknown)
        .and_then(|s| s.measured)
        .filter(|v| v.is_finite())
    else {
        return current;
    };
    match (
        measured.partial_cmp(&low_threshold),
        measured.partial_cmp(&high_threshold),
    ) {
        (Some(Ordering::Less), _) => ActuatorLevel::Switch(true),
        (_, Some(Ordering::Greater)) => ActuatorLevel::Switch(false),
        _ => current,
    }
}

/// Clamp to the goal's bounds, then to the physical `0..=100` range.
fn bound(level: f64, min_level: f64, max_level: f64) -> f64 {
    level.max(min_level).min(max_level).clamp(0.0, 100.0)
}
