//! Operator control state for runtime loop management.
//!
//! This module provides shared atomic state read by every zone task. The
//! operator can pause/resume all zones, change the tick speed, and trigger
//! a clean shutdown -- all without stopping the process.
//!
//! # Architecture
//!
//! All mutable control fields use [`std::sync::atomic`] types so they can be
//! shared between the zone tasks and the command reader without locks on the
//! hot path. Sleeping tasks are woken through [`Notify`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Shortest tick interval an operator may set, in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Reason why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// Every zone reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// An operator issued a stop command.
    OperatorStop,
}

/// Shared operator control state.
///
/// This struct is wrapped in `Arc` and shared between the zone tasks and
/// whatever feeds operator commands. Atomic fields are used for lock-free
/// reads on the tick hot path.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether the loop is currently paused.
    paused: AtomicBool,

    /// Wakes paused tasks on resume or stop.
    resume_notify: Notify,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes sleeping tasks on stop.
    stop_notify: Notify,

    /// Current tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Wall-clock time when the run started.
    started_at: DateTime<Utc>,

    /// Maximum number of simulation ticks per zone (0 = unlimited).
    max_ticks: u64,

    /// Reason the run ended, if it has.
    end_reason: Mutex<Option<RunEndReason>>,
}

impl OperatorState {
    /// Create a new operator state.
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            tick_interval_ms: AtomicU64::new(tick_interval_ms.max(MIN_TICK_INTERVAL_MS)),
            started_at: Utc::now(),
            max_ticks,
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Check whether the loop is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause every zone. Simulation tasks sleep until resumed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume and wake every paused task.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Wait until the loop is no longer paused or a stop was requested.
    ///
    /// Returns immediately if not paused.
    pub async fn wait_if_paused(&self) {
        loop {
            let notified = self.resume_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_paused() || self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop of every zone.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
        self.resume_notify.notify_waiters();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Record the reason the run ended. The first reason recorded wins.
    pub async fn set_end_reason(&self, reason: RunEndReason) {
        let mut guard = self.end_reason.lock().await;
        if guard.is_none() {
            *guard = Some(reason);
        }
    }

    /// Get the reason the run ended, if it has.
    pub async fn end_reason(&self) -> Option<RunEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Tick Speed
    // -----------------------------------------------------------------------

    /// Get the current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Set the tick interval in milliseconds.
    ///
    /// Returns the previous interval on success, or `None` if the value was
    /// rejected (below [`MIN_TICK_INTERVAL_MS`]).
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        let prev = self.tick_interval_ms.swap(ms, Ordering::AcqRel);
        Some(prev)
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Check whether the tick limit has been reached.
    ///
    /// Returns `true` if `max_ticks > 0` and `current_tick >= max_ticks`.
    pub const fn tick_limit_reached(&self, current_tick: u64) -> bool {
        self.max_ticks > 0 && current_tick >= self.max_ticks
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed wall-clock seconds since start.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Get the configured max ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Snapshot for logging or an operator surface.
    pub async fn status(&self) -> OperatorStatus {
        OperatorStatus {
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms(),
            elapsed_seconds: self.elapsed_seconds(),
            max_ticks: self.max_ticks,
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON-serializable status of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorStatus {
    /// Whether the loop is paused.
    pub paused: bool,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Current tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Elapsed wall-clock seconds since start.
    pub elapsed_seconds: u64,
    /// Configured maximum ticks (0 = unlimited).
    pub max_ticks: u64,
    /// The reason the run ended, if applicable.
    pub end_reason: Option<RunEndReason>,
    /// ISO 8601 timestamp of when the run started.
    pub started_at: String,
}
