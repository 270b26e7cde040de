//! Trigger Engine
//!
//! Triggers are persisted conditions that become satisfied over time or when
//! something shows up on screen. The crate has three layers:
//!
//! - [`TriggerEngine`] - evaluates one trigger (enabled, cooldown, then the
//!   type-specific handler)
//! - [`TriggerCoordinator`] - evaluates all stored triggers and persists results
//! - [`TriggerPoller`] - runs the coordinator in the background with idle
//!   backoff and overlap skipping

pub mod coordinator;
pub mod poller;
pub mod trigger;
pub mod trigger_eval;

pub use coordinator::{TriggerCoordinator, TriggerFilter};
pub use poller::{PollerConfig, PollerMetrics, PollerMetricsSnapshot, TickOutcome, TriggerPoller};
pub use trigger::{
    reasons, DelayParams, MatchParams, ScheduleParams, Trigger, TriggerError, TriggerEvaluation,
    TriggerEvaluationResult, TriggerKind, TriggerResult, TriggerStatus, TriggerType,
    DEFAULT_IMAGE_THRESHOLD, DEFAULT_TEXT_THRESHOLD,
};
pub use trigger_eval::{DelayHandler, MatchHandler, ScheduleHandler, TriggerEngine, TriggerHandler};
