//! Simulation clock, diagnosis, control decisions and zone orchestration
//! for barnloop.
//!
//! This crate owns the sense, diagnose, decide loop of every barn zone.
//! Physics lives in `barnloop-physics`; this crate drives it on a simulated
//! clock, classifies the resulting readings and turns them into actuator
//! plans.
//!
//! # Modules
//!
//! - [`clock`] -- Simulated clock with checked tick and time arithmetic.
//! - [`config`] -- Configuration loading from `barnloop-config.yaml` into
//!   strongly-typed structs, plus the hot-reloadable [`ConfigHandle`].
//! - [`detector`] -- Symptom classification with hysteresis.
//! - [`overrides`] -- Manual command validation and the override registry.
//! - [`decision`] -- The pure [`decide`] function and the actuator table.
//! - [`pipeline`] -- Simulation, analysis and decision stages, and the
//!   synchronous [`ZonePipeline`].
//! - [`operator`] -- Pause, resume, speed and stop controls.
//! - [`runner`] -- One async task group per zone.
//! - [`sinks`] -- Executor and knowledge store interfaces.
//!
//! [`ConfigHandle`]: config::ConfigHandle
//! [`decide`]: decision::decide
//! [`ZonePipeline`]: pipeline::ZonePipeline

pub mod clock;
pub mod config;
pub mod decision;
pub mod detector;
pub mod operator;
pub mod overrides;
pub mod pipeline;
pub mod runner;
pub mod sinks;
