//! Background trigger polling
//!
//! The poller wakes up on an interval and hands one evaluation pass to the
//! coordinator. A pass is never started while the previous one is still in
//! flight. When no session is running the pass can be skipped, and repeated
//! idle skips stretch the interval up to a ceiling.

use emu_core::{CancellationToken, SessionHost};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::coordinator::TriggerCoordinator;
use crate::trigger::TriggerError;

/// Poller timing and idle behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between ticks while sessions are active
    pub interval: Duration,

    /// Upper bound for the backed-off interval
    pub max_idle_interval: Duration,

    /// Multiplier applied after each idle skip
    pub idle_backoff_factor: u32,

    /// Skip passes while no session is running
    pub skip_when_no_sessions: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_idle_interval: Duration::from_millis(10_000),
            idle_backoff_factor: 2,
            skip_when_no_sessions: true,
        }
    }
}

impl PollerConfig {
    /// Delay to use after an idle skip
    pub fn backoff(&self, current: Duration) -> Duration {
        let max = self.max_idle_interval.max(self.interval);
        current
            .saturating_mul(self.idle_backoff_factor.max(1))
            .min(max)
    }
}

/// Counters maintained by the poller
#[derive(Debug, Default)]
pub struct PollerMetrics {
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    idle_skips: AtomicU64,
    overlap_skips: AtomicU64,
    triggers_evaluated: AtomicU64,
    persist_failures: AtomicU64,
    pass_errors: AtomicU64,
    current_interval_ms: AtomicU64,
}

/// Point-in-time copy of [`PollerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerMetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub idle_skips: u64,
    pub overlap_skips: u64,
    pub triggers_evaluated: u64,
    pub persist_failures: u64,
    pub pass_errors: u64,
    pub current_interval_ms: u64,
}

impl PollerMetrics {
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            idle_skips: self.idle_skips.load(Ordering::Relaxed),
            overlap_skips: self.overlap_skips.load(Ordering::Relaxed),
            triggers_evaluated: self.triggers_evaluated.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            pass_errors: self.pass_errors.load(Ordering::Relaxed),
            current_interval_ms: self.current_interval_ms.load(Ordering::Relaxed),
        }
    }

    fn record_pass(&self, outcome: &Result<usize, TriggerError>) {
        match outcome {
            Ok(evaluated) => {
                self.triggers_evaluated
                    .fetch_add(*evaluated as u64, Ordering::Relaxed);
            }
            Err(TriggerError::PersistFailed {
                evaluated, failed, ..
            }) => {
                self.triggers_evaluated
                    .fetch_add(*evaluated as u64, Ordering::Relaxed);
                self.persist_failures
                    .fetch_add(failed.len() as u64, Ordering::Relaxed);
            }
            Err(TriggerError::Cancelled) => {}
            Err(_) => {
                self.pass_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a single tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// A pass was spawned
    Started(JoinHandle<()>),
    /// No session running, pass skipped
    IdleSkipped,
    /// Previous pass still in flight
    OverlapSkipped,
}

/// Clears the in-flight flag when a pass ends, even if it panicked
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the coordinator from a background task
pub struct TriggerPoller {
    coordinator: Arc<TriggerCoordinator>,
    sessions: Arc<dyn SessionHost>,
    config: PollerConfig,
    in_flight: Arc<AtomicBool>,
    metrics: Arc<PollerMetrics>,
}

impl TriggerPoller {
    pub fn new(
        coordinator: Arc<TriggerCoordinator>,
        sessions: Arc<dyn SessionHost>,
        config: PollerConfig,
    ) -> Self {
        let metrics = Arc::new(PollerMetrics::default());
        metrics
            .current_interval_ms
            .store(config.interval.as_millis() as u64, Ordering::Relaxed);

        Self {
            coordinator,
            sessions,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PollerMetrics> {
        self.metrics.clone()
    }

    /// Whether a pass is currently running
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one tick: skip or spawn a pass
    pub async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        if self.config.skip_when_no_sessions && !self.sessions.has_running_sessions().await {
            trace!("No running sessions, skipping trigger pass");
            self.metrics.idle_skips.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::IdleSkipped;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous trigger pass still running, skipping");
            self.metrics.overlap_skips.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::OverlapSkipped;
        }

        let guard = InFlight(self.in_flight.clone());
        let coordinator = self.coordinator.clone();
        let metrics = self.metrics.clone();
        let cancel = cancel.clone();

        metrics.cycles_started.fetch_add(1, Ordering::Relaxed);

        TickOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            let outcome = coordinator.evaluate_all(None, &cancel).await;
            match &outcome {
                Ok(count) => trace!(evaluated = count, "Trigger pass complete"),
                Err(TriggerError::Cancelled) => debug!("Trigger pass cancelled"),
                Err(e @ TriggerError::PersistFailed { .. }) => warn!(error = %e, "Trigger pass incomplete"),
                Err(e) => error!(error = %e, "Trigger pass failed"),
            }
            metrics.record_pass(&outcome);
        }))
    }

    /// Start the polling loop
    ///
    /// Ticks immediately, then waits `interval` between ticks. The loop ends
    /// when `cancel` fires; an in-flight pass sees the same token.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            skip_when_no_sessions = self.config.skip_when_no_sessions,
            "Starting trigger poller"
        );

        tokio::spawn(async move {
            let mut delay = self.config.interval;

            loop {
                delay = match self.tick(&cancel).await {
                    TickOutcome::Started(_) => self.config.interval,
                    TickOutcome::IdleSkipped => self.config.backoff(delay),
                    TickOutcome::OverlapSkipped => delay,
                };
                self.metrics
                    .current_interval_ms
                    .store(delay.as_millis() as u64, Ordering::Relaxed);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!("Trigger poller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_max() {
        let config = PollerConfig::default();

        let mut delay = config.interval;
        let mut seen = Vec::new();
        for _ in 0..6 {
            delay = config.backoff(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn test_backoff_factor_one_keeps_interval() {
        let config = PollerConfig {
            idle_backoff_factor: 1,
            ..Default::default()
        };
        assert_eq!(config.backoff(config.interval), config.interval);

        let config = PollerConfig {
            idle_backoff_factor: 0,
            ..Default::default()
        };
        assert_eq!(config.backoff(config.interval), config.interval);
    }

    #[test]
    fn test_metrics_record_partial_pass() {
        let metrics = PollerMetrics::default();
        metrics.record_pass(&Ok(3));
        metrics.record_pass(&Err(TriggerError::PersistFailed {
            evaluated: 2,
            failed: vec!["a".into()],
            message: "disk full".into(),
        }));
        metrics.record_pass(&Err(TriggerError::NotFound("x".into())));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.triggers_evaluated, 5);
        assert_eq!(snapshot.persist_failures, 1);
        assert_eq!(snapshot.pass_errors, 1);
        assert_eq!(snapshot.cycles_completed, 3);
    }
}
