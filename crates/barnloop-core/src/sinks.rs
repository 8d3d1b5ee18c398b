//! Output interfaces to the external collaborators.
//!
//! The executor consumes plans and the knowledge store records readings,
//! statuses and plans. Both are reached through narrow traits whose methods
//! must hand data off without blocking the control loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use barnloop_types::{Plan, Reading, StatusReport};
use tokio::sync::mpsc;

/// Receives plans for actuation.
pub trait PlanSink: Send + Sync {
    /// Hand over the plans of one decision cycle.
    fn publish_plans(&self, plans: &[Plan]);
}

/// Receives history for the knowledge store.
pub trait KnowledgeSink: Send + Sync {
    /// Record raw readings.
    fn record_readings(&self, readings: &[Reading]);

    /// Record one analysis cycle's statuses.
    fn record_statuses(&self, statuses: &[StatusReport]);

    /// Record one decision cycle's plans.
    fn record_plans(&self, plans: &[Plan]);
}

/// The collaborators every zone reports to.
#[derive(Clone)]
pub struct Sinks {
    /// The executor.
    pub plans: Arc<dyn PlanSink>,
    /// The knowledge store.
    pub knowledge: Arc<dyn KnowledgeSink>,
}

impl core::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tracing executor
// ---------------------------------------------------------------------------

/// Executor stand-in that logs every plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExecutor;

impl PlanSink for TracingExecutor {
    fn publish_plans(&self, plans: &[Plan]) {
        for plan in plans {
            tracing::info!(
                zone = %plan.zone_id,
                actuator = %plan.actuator_id,
                target = %plan.target_level,
                reason = ?plan.reason,
                expires_at = ?plan.expires_at,
                cycle = plan.cycle,
                "plan issued"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory knowledge
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct History {
    readings: VecDeque<Reading>,
    statuses: VecDeque<StatusReport>,
    plans: VecDeque<Plan>,
}

/// Bounded in-memory history, oldest entries evicted first.
#[derive(Debug)]
pub struct MemoryKnowledge {
    capacity: usize,
    history: Mutex<History>,
}

impl MemoryKnowledge {
    /// Keep at most `capacity` entries of each kind.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            history: Mutex::new(History::default()),
        }
    }

    /// Recorded readings, oldest first.
    pub fn readings(&self) -> Vec<Reading> {
        self.lock().readings.iter().cloned().collect()
    }

    /// Recorded statuses, oldest first.
    pub fn statuses(&self) -> Vec<StatusReport> {
        self.lock().statuses.iter().cloned().collect()
    }

    /// Recorded plans, oldest first.
    pub fn plans(&self) -> Vec<Plan> {
        self.lock().plans.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_bounded<T: Clone>(queue: &mut VecDeque<T>, items: &[T], capacity: usize) {
    queue.extend(items.iter().cloned());
    while queue.len() > capacity {
        queue.pop_front();
    }
}

impl KnowledgeSink for MemoryKnowledge {
    fn record_readings(&self, readings: &[Reading]) {
        push_bounded(&mut self.lock().readings, readings, self.capacity);
    }

    fn record_statuses(&self, statuses: &[StatusReport]) {
        push_bounded(&mut self.lock().statuses, statuses, self.capacity);
    }

    fn record_plans(&self, plans: &[Plan]) {
        push_bounded(&mut self.lock().plans, plans, self.capacity);
    }
}

// ---------------------------------------------------------------------------
// Channel forwarding
// ---------------------------------------------------------------------------

/// One handoff forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Raw readings.
    Readings(Vec<Reading>),
    /// Status records.
    Statuses(Vec<StatusReport>),
    /// Plans, as recorded for knowledge.
    Plans(Vec<Plan>),
    /// Plans, as published to the executor.
    Published(Vec<Plan>),
}

/// Forwards every handoff over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// A sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("sink receiver dropped, discarding event");
        }
    }
}

impl PlanSink for ChannelSink {
    fn publish_plans(&self, plans: &[Plan]) {
        self.forward(SinkEvent::Published(plans.to_vec()));
    }
}

impl KnowledgeSink for ChannelSink {
    fn record_readings(&self, readings: &[Reading]) {
        self.forward(SinkEvent::Readings(readings.to_vec()));
    }

    fn record_statuses(&self, statuses: &[StatusReport]) {
        self.forward(SinkEvent::Statuses(statuses.to_vec()));
    }

    fn record_plans(&self, plans: &[Plan]) {
        self.forward(SinkEvent::Plans(plans.to_vec()));
    }
}
