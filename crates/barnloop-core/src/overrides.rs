//! Manual override registry.
//!
//! A [`Command`] is validated against the zone's declared actuators and,
//! if accepted, becomes an [`Override`] that pins one actuator until its
//! time-to-live elapses. A newer override for the same actuator replaces the
//! older one. Rejected commands leave every other override untouched.

use std::collections::BTreeMap;

use barnloop_types::{
    ActuatorId, ActuatorKind, ActuatorLevel, Command, CommandAction, CommandId, Override, ZoneId,
};
use chrono::{DateTime, TimeDelta, Utc};

/// Reasons a manual command is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// The command names a different zone.
    #[error("command for zone {got} delivered to zone {expected}")]
    WrongZone {
        /// The receiving zone.
        expected: ZoneId,
        /// The zone named in the command.
        got: ZoneId,
    },

    /// No such actuator is declared in the zone.
    #[error("unknown actuator {0}")]
    UnknownActuator(ActuatorId),

    /// The action does not fit the actuator kind.
    #[error("action {action:?} is not valid for {kind:?} actuator {actuator}")]
    ActionMismatch {
        /// The target actuator.
        actuator: ActuatorId,
        /// Its kind.
        kind: ActuatorKind,
        /// The requested action.
        action: CommandAction,
    },

    /// `SET` without a level.
    #[error("SET command for {0} has no level")]
    MissingLevel(ActuatorId),

    /// Level outside `0..=100` or not finite.
    #[error("level {level} for {actuator} is outside 0..=100")]
    LevelOutOfRange {
        /// The target actuator.
        actuator: ActuatorId,
        /// The rejected level.
        level: f64,
    },

    /// A zero time-to-live would never take effect.
    #[error("command for {0} has a zero ttl")]
    ZeroTtl(ActuatorId),

    /// The time-to-live does not fit the simulated calendar.
    #[error("ttl of {ttl_s}s is too long")]
    TtlOverflow {
        /// The rejected time-to-live.
        ttl_s: u64,
    },

    /// The zone's command inbox is full.
    #[error("command inbox of zone {0} is full")]
    InboxFull(ZoneId),

    /// The zone is no longer running.
    #[error("zone {0} has stopped")]
    ZoneStopped(ZoneId),
}

/// Active overrides of one zone, keyed by actuator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideRegistry {
    active: BTreeMap<ActuatorId, Override>,
}

impl OverrideRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            active: BTreeMap::new(),
        }
    }

    /// Validate `command` and register the resulting override.
    ///
    /// `declared` maps every declared actuator of the zone to its kind.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing why the command was rejected;
    /// the registry is unchanged in that case.
    pub fn submit(
        &mut self,
        zone_id: &ZoneId,
        command: &Command,
        declared: &BTreeMap<ActuatorId, ActuatorKind>,
        now: DateTime<Utc>,
    ) -> Result<Override, CommandError> {
        let ov = validate(zone_id, command, declared, now)?;
        if let Some(replaced) = self.active.insert(ov.actuator_id.clone(), ov.clone()) {
            tracing::debug!(
                actuator = %replaced.actuator_id,
                replaced = %replaced.command_id,
                "override replaced by newer command"
            );
        }
        tracing::info!(
            zone = %zone_id,
            actuator = %ov.actuator_id,
            level = %ov.level,
            expires_at = %ov.expires_at,
            command_id = %ov.command_id,
            "override accepted"
        );
        Ok(ov)
    }

    /// Remove every override that no longer applies at `now` and return them.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Override> {
        let expired: Vec<ActuatorId> = self
            .active
            .iter()
            .filter(|(_, ov)| !ov.is_active(now))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.active.remove(&id))
            .collect()
    }

    /// Drop overrides for actuators that are no longer declared.
    pub fn retain_declared(&mut self, declared: &BTreeMap<ActuatorId, ActuatorKind>) {
        self.active.retain(|id, ov| {
            let keep = declared.contains_key(id);
            if !keep {
                tracing::info!(actuator = %id, command_id = %ov.command_id, "override dropped with its actuator");
            }
            keep
        });
    }

    /// The override pinning `actuator`, if any.
    pub fn get(&self, actuator: &ActuatorId) -> Option<&Override> {
        self.active.get(actuator)
    }

    /// Number of registered overrides.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no override is registered.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

fn validate(
    zone_id: &ZoneId,
    command: &Command,
    declared: &BTreeMap<ActuatorId, ActuatorKind>,
    now: DateTime<Utc>,
) -> Result<Override, CommandError> {
    if &command.zone_id != zone_id {
        return Err(CommandError::WrongZone {
            expected: zone_id.clone(),
            got: command.zone_id.clone(),
        });
    }
    let actuator = &command.actuator_id;
    let kind = *declared
        .get(actuator)
        .ok_or_else(|| CommandError::UnknownActuator(actuator.clone()))?;

    let level = match (command.action, kind.is_continuous()) {
        (CommandAction::Set, true) => {
            let level = command
                .level
                .ok_or_else(|| CommandError::MissingLevel(actuator.clone()))?;
            if !level.is_finite() || !(0.0..=100.0).contains(&level) {
                return Err(CommandError::LevelOutOfRange {
                    actuator: actuator.clone(),
                    level,
                });
            }
            ActuatorLevel::Percent(level)
        }
        (CommandAction::On, false) => ActuatorLevel::Switch(true),
        (CommandAction::Off, false) => ActuatorLevel::Switch(false),
        (action, _) => {
            return Err(CommandError::ActionMismatch {
                actuator: actuator.clone(),
                kind,
                action,
            });
        }
    };

    if command.ttl_s == 0 {
        return Err(CommandError::ZeroTtl(actuator.clone()));
    }
    let expires_at = i64::try_from(command.ttl_s)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(CommandError::TtlOverflow {
            ttl_s: command.ttl_s,
        })?;

    Ok(Override {
        command_id: CommandId::new(),
        actuator_id: actuator.clone(),
        level,
        issued_at: now,
        expires_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn zone() -> ZoneId {
        ZoneId::from("zone1")
    }

    fn declared() -> BTreeMap<ActuatorId, ActuatorKind> {
        BTreeMap::from([
            (ActuatorId::from("fan"), ActuatorKind::Fan),
            (ActuatorId::from("feeder"), ActuatorKind::FeedDispenser),
        ])
    }

    fn command(actuator: &str, action: CommandAction, level: Option<f64>, ttl_s: u64) -> Command {
        Command {
            zone_id: zone(),
            actuator_id: ActuatorId::from(actuator),
            action,
            level,
            ttl_s,
        }
    }

    #[test]
    fn set_on_continuous_actuator_is_accepted() {
        let mut reg = OverrideRegistry::new();
        let ov = reg
            .submit(
                &zone(),
                &command("fan", CommandAction::Set, Some(80.0), 60),
                &declared(),
                t0(),
            )
            .unwrap();
        assert_eq!(ov.level, ActuatorLevel::Percent(80.0));
        assert_eq!(ov.expires_at, t0() + TimeDelta::seconds(60));
        assert_eq!(reg.get(&ActuatorId::from("fan")), Some(&ov));
    }

    #[test]
    fn on_off_on_discrete_actuator_is_accepted() {
        let mut reg = OverrideRegistry::new();
        let ov = reg
            .submit(
                &zone(),
                &command("feeder", CommandAction::On, None, 30),
                &declared(),
                t0(),
            )
            .unwrap();
        assert_eq!(ov.level, ActuatorLevel::Switch(true));
    }

    #[test]
    fn malformed_commands_are_rejected_without_side_effects() {
        let mut reg = OverrideRegistry::new();
        reg.submit(
            &zone(),
            &command("fan", CommandAction::Set, Some(50.0), 60),
            &declared(),
            t0(),
        )
        .unwrap();
        let before = reg.clone();

        let bad = [
            command("nope", CommandAction::Set, Some(50.0), 60),
            command("fan", CommandAction::On, None, 60),
            command("feeder", CommandAction::Set, Some(50.0), 60),
            command("fan", CommandAction::Set, None, 60),
            command("fan", CommandAction::Set, Some(120.0), 60),
            command("fan", CommandAction::Set, Some(f64::NAN), 60),
            command("fan", CommandAction::Set, Some(10.0), 0),
            command("fan", CommandAction::Set, Some(10.0), u64::MAX),
        ];
        for cmd in &bad {
            assert!(reg.submit(&zone(), cmd, &declared(), t0()).is_err(), "{cmd:?}");
        }
        assert_eq!(reg, before);
    }

    #[test]
    fn wrong_zone_is_rejected() {
        let mut reg = OverrideRegistry::new();
        let mut cmd = command("fan", CommandAction::Set, Some(50.0), 60);
        cmd.zone_id = ZoneId::from("zone2");
        assert!(matches!(
            reg.submit(&zone(), &cmd, &declared(), t0()),
            Err(CommandError::WrongZone { .. })
        ));
    }

    #[test]
    fn newer_command_replaces_older() {
        let mut reg = OverrideRegistry::new();
        reg.submit(
            &zone(),
            &command("fan", CommandAction::Set, Some(20.0), 60),
            &declared(),
            t0(),
        )
        .unwrap();
        reg.submit(
            &zone(),
            &command("fan", CommandAction::Set, Some(90.0), 10),
            &declared(),
            t0(),
        )
        .unwrap();
        assert_eq!(reg.len(), 1);
        let ov = reg.get(&ActuatorId::from("fan")).unwrap();
        assert_eq!(ov.level, ActuatorLevel::Percent(90.0));
    }

    #[test]
    fn expire_removes_elapsed_overrides_only() {
        let mut reg = OverrideRegistry::new();
        reg.submit(
            &zone(),
            &command("fan", CommandAction::Set, Some(20.0), 10),
            &declared(),
            t0(),
        )
        .unwrap();
        reg.submit(
            &zone(),
            &command("feeder", CommandAction::Off, None, 100),
            &declared(),
            t0(),
        )
        .unwrap();

        assert!(reg.expire(t0() + TimeDelta::seconds(9)).is_empty());
        let expired = reg.expire(t0() + TimeDelta::seconds(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired.first().map(|o| o.actuator_id.as_str()), Some("fan"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn undeclared_actuators_lose_their_overrides() {
        let mut reg = OverrideRegistry::new();
        reg.submit(
            &zone(),
            &command("fan", CommandAction::Set, Some(20.0), 10),
            &declared(),
            t0(),
        )
        .unwrap();
        let mut fewer = declared();
        fewer.remove(&ActuatorId::from("fan"));
        reg.retain_declared(&fewer);
        assert!(reg.is_empty());
    }
}
