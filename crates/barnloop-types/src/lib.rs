//! Shared type definitions for the barnloop control engine.
//!
//! This crate is the single source of truth for the data model exchanged
//! between the physics model, the control pipeline, and the external
//! collaborators (executor, knowledge store, dashboard). Wire types flow
//! downstream to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Zone, actuator and command identifiers
//! - [`enums`] -- Metrics, statuses, actuator kinds, control modes
//! - [`structs`] -- Environment state, readings, symptoms, overrides, plans

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ActuatorKind, CommandAction, ControlMode, Metric, PlanReason, Status};
pub use ids::{ActuatorId, CommandId, ZoneId};
pub use structs::{
    ActuatorLevel, ActuatorState, Command, EnvironmentState, LEVEL_EPSILON, Override, Plan,
    Reading, StatusReport, Symptom,
};
