//! Physical and biological environment model for barnloop.
//!
//! Everything here is pure and deterministic: given the same constants,
//! state, actuator levels and seed, the same trajectory comes out.
//!
//! # Modules
//!
//! - [`constants`] -- Validated zone, bird, actuator and outside constants
//! - [`disturbance`] -- Diurnal outside conditions
//! - [`effect`] -- Actuator level to physical effect, refill recommendations
//! - [`model`] -- Sub-stepped explicit Euler integrator
//! - [`sensors`] -- Seeded noisy sensor emulation
//! - [`error`] -- Physics error types

pub mod constants;
pub mod disturbance;
pub mod effect;
pub mod error;
pub mod model;
pub mod sensors;

pub use constants::{ActuatorConstants, BirdConstants, OutsideConstants, ZoneConstants};
pub use disturbance::{OutsideConditions, outside_at};
pub use effect::{
    FULL_LEVEL_PCT, PhysicalEffect, RefillRecommendation, combined_effect, effect,
    refill_recommendation,
};
pub use error::PhysicsError;
pub use model::advance;
pub use sensors::{SensorArray, SensorNoise};
