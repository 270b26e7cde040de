//! Trigger evaluation logic
//!
//! [`TriggerEngine`] decides whether a trigger is currently satisfied. The
//! generic checks (enabled flag, cooldown) run first; the type-specific check
//! is delegated to the first registered [`TriggerHandler`] that accepts the
//! trigger's type.
//!
//! Evaluation never mutates the trigger. When a handler has to establish the
//! `enabled_at` baseline it reports it in [`TriggerEvaluation`] and the caller
//! folds it in with [`Trigger::with_evaluation`] before persisting.

use chrono::{DateTime, Duration, Utc};
use emu_core::{CancellationToken, ConditionError, ConditionEvaluator, ConditionSource};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::trigger::{
    reasons, DelayParams, MatchParams, ScheduleParams, Trigger, TriggerError, TriggerEvaluation,
    TriggerEvaluationResult, TriggerKind, TriggerResult, TriggerType,
};

/// Whole seconds as a duration; `None` when beyond chrono's range, which
/// callers treat as a span that never elapses
fn span(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds).ok().and_then(Duration::try_seconds)
}

/// Delay handler: satisfied once enough time passed since the trigger was enabled
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayHandler;

impl DelayHandler {
    fn evaluate(&self, trigger: &Trigger, params: &DelayParams, now: DateTime<Utc>) -> TriggerEvaluation {
        let (baseline, established) = match trigger.enabled_at {
            Some(at) => (at, None),
            None => (now, Some(now)),
        };

        let elapsed = now - baseline;
        let required = span(params.seconds);

        trace!(
            trigger_id = %trigger.id,
            elapsed_ms = elapsed.num_milliseconds(),
            required_secs = params.seconds,
            "Delay check"
        );

        let result = if required.is_some_and(|required| elapsed >= required) {
            TriggerEvaluationResult::satisfied(reasons::DELAY_ELAPSED, now)
        } else if established.is_some() {
            TriggerEvaluationResult::pending(reasons::DELAY_PENDING_INITIAL, now)
        } else {
            TriggerEvaluationResult::pending(reasons::WAITING_DELAY, now)
        };

        TriggerEvaluation {
            result,
            established_enabled_at: established,
        }
    }
}

/// Schedule handler: satisfied once a fixed point in time is reached
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleHandler;

impl ScheduleHandler {
    fn evaluate(
        &self,
        trigger: &Trigger,
        params: &ScheduleParams,
        now: DateTime<Utc>,
    ) -> TriggerEvaluation {
        let (baseline, established) = match trigger.enabled_at {
            Some(at) => (at, None),
            None => (now, Some(now)),
        };

        // A schedule that was already behind us when the trigger got enabled
        // never fires; it stays disabled until re-enabled with a new baseline.
        let result = if params.at < baseline {
            TriggerEvaluationResult::disabled(reasons::SCHEDULE_IN_PAST, now)
        } else if now >= params.at {
            TriggerEvaluationResult::satisfied(reasons::TIME_REACHED, now)
        } else {
            TriggerEvaluationResult::pending(reasons::WAITING_FOR_TIME, now)
        };

        TriggerEvaluation {
            result,
            established_enabled_at: established,
        }
    }
}

/// Image/text match handler backed by an external condition evaluator
#[derive(Clone)]
pub struct MatchHandler {
    conditions: Arc<dyn ConditionEvaluator>,
}

impl MatchHandler {
    pub fn new(conditions: Arc<dyn ConditionEvaluator>) -> Self {
        Self { conditions }
    }

    async fn evaluate(
        &self,
        trigger: &Trigger,
        params: &MatchParams,
        source: ConditionSource,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TriggerResult<TriggerEvaluation> {
        let condition = params.to_condition(source);

        debug!(
            trigger_id = %trigger.id,
            target = %condition.target_id,
            threshold = ?condition.confidence_threshold,
            "Evaluating match trigger"
        );

        let result = match self.conditions.measure(&condition, cancel).await {
            Ok(measure) => {
                let result = if condition.is_satisfied_by(&measure) {
                    TriggerEvaluationResult::satisfied(reasons::MATCH_FOUND, now)
                } else {
                    TriggerEvaluationResult::pending(reasons::MATCH_NOT_FOUND, now)
                };
                result.with_confidence(measure.confidence)
            }
            Err(ConditionError::Cancelled) => return Err(TriggerError::Cancelled),
            Err(e) => {
                warn!(trigger_id = %trigger.id, error = %e, "Condition evaluation failed");
                TriggerEvaluationResult::pending(reasons::CONDITION_ERROR, now)
            }
        };

        Ok(TriggerEvaluation::from_result(result))
    }
}

/// A registered type-specific evaluator
#[derive(Clone)]
pub enum TriggerHandler {
    Delay(DelayHandler),
    Schedule(ScheduleHandler),
    Match(MatchHandler),
}

impl TriggerHandler {
    /// Capability predicate
    pub fn accepts(&self, trigger_type: TriggerType) -> bool {
        match self {
            TriggerHandler::Delay(_) => trigger_type == TriggerType::Delay,
            TriggerHandler::Schedule(_) => trigger_type == TriggerType::Schedule,
            TriggerHandler::Match(_) => {
                matches!(trigger_type, TriggerType::ImageMatch | TriggerType::TextMatch)
            }
        }
    }

    async fn evaluate(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TriggerResult<TriggerEvaluation> {
        match (self, &trigger.kind) {
            (TriggerHandler::Delay(h), TriggerKind::Delay(p)) => Ok(h.evaluate(trigger, p, now)),
            (TriggerHandler::Schedule(h), TriggerKind::Schedule(p)) => {
                Ok(h.evaluate(trigger, p, now))
            }
            (TriggerHandler::Match(h), TriggerKind::ImageMatch(p)) => {
                h.evaluate(trigger, p, ConditionSource::Image, now, cancel).await
            }
            (TriggerHandler::Match(h), TriggerKind::TextMatch(p)) => {
                h.evaluate(trigger, p, ConditionSource::Text, now, cancel).await
            }
            _ => Ok(TriggerEvaluation::from_result(
                TriggerEvaluationResult::disabled(reasons::NO_EVALUATOR, now),
            )),
        }
    }
}

/// Trigger evaluation engine
pub struct TriggerEngine {
    handlers: Vec<TriggerHandler>,
}

impl TriggerEngine {
    /// Engine with the built-in handlers
    ///
    /// Match triggers are only evaluable when a condition evaluator is given;
    /// without one they report [`reasons::NO_EVALUATOR`].
    pub fn new(conditions: Option<Arc<dyn ConditionEvaluator>>) -> Self {
        let mut handlers = vec![
            TriggerHandler::Delay(DelayHandler),
            TriggerHandler::Schedule(ScheduleHandler),
        ];
        if let Some(conditions) = conditions {
            handlers.push(TriggerHandler::Match(MatchHandler::new(conditions)));
        }
        Self { handlers }
    }

    /// Engine with an explicit handler list (first match wins)
    pub fn with_handlers(handlers: Vec<TriggerHandler>) -> Self {
        Self { handlers }
    }

    /// Register another handler after the existing ones
    pub fn register(&mut self, handler: TriggerHandler) {
        self.handlers.push(handler);
    }

    /// Evaluate a trigger at `now`
    ///
    /// Only cancellation is reported as an error; every other outcome,
    /// including collaborator failures, is a result.
    pub async fn evaluate(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TriggerResult<TriggerEvaluation> {
        if cancel.is_cancelled() {
            return Err(TriggerError::Cancelled);
        }

        if !trigger.enabled {
            trace!(trigger_id = %trigger.id, "Trigger disabled");
            return Ok(TriggerEvaluation::from_result(
                TriggerEvaluationResult::disabled(reasons::TRIGGER_DISABLED, now),
            ));
        }

        if let Some(last_fired) = trigger.last_fired_at {
            let cooling = match span(trigger.cooldown_seconds) {
                Some(cooldown) => now - last_fired < cooldown,
                None => true,
            };
            if trigger.cooldown_seconds > 0 && cooling {
                trace!(trigger_id = %trigger.id, %last_fired, "Trigger cooling down");
                return Ok(TriggerEvaluation::from_result(
                    TriggerEvaluationResult::cooldown(now),
                ));
            }
        }

        let trigger_type = trigger.trigger_type();
        let Some(handler) = self.handlers.iter().find(|h| h.accepts(trigger_type)) else {
            debug!(trigger_id = %trigger.id, trigger_type = trigger_type.as_str(), "No handler registered");
            return Ok(TriggerEvaluation::from_result(
                TriggerEvaluationResult::disabled(reasons::NO_EVALUATOR, now),
            ));
        };

        let evaluation = handler.evaluate(trigger, now, cancel).await?;
        debug!(
            trigger_id = %trigger.id,
            status = ?evaluation.result.status,
            reason = %evaluation.result.reason,
            "Trigger evaluated"
        );
        Ok(evaluation)
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerStatus;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use emu_core::{Condition, ConditionMeasure, ConditionMode, ConditionResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn delay(seconds: u64) -> Trigger {
        Trigger::new("delay", TriggerKind::Delay(DelayParams { seconds }))
    }

    fn schedule(at: DateTime<Utc>) -> Trigger {
        Trigger::new("schedule", TriggerKind::Schedule(ScheduleParams { at }))
    }

    fn image(target: &str) -> Trigger {
        Trigger::new(
            "image",
            TriggerKind::ImageMatch(MatchParams {
                target_id: target.to_string(),
                confidence_threshold: Some(0.85),
                mode: ConditionMode::Present,
                region: None,
                language: None,
            }),
        )
    }

    /// Reports a fixed confidence and counts calls
    struct FixedScore {
        confidence: Option<f64>,
        calls: AtomicUsize,
    }

    impl FixedScore {
        fn new(confidence: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                confidence,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConditionEvaluator for FixedScore {
        async fn measure(
            &self,
            _condition: &Condition,
            _cancel: &CancellationToken,
        ) -> ConditionResult<ConditionMeasure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.confidence {
                Some(c) => ConditionMeasure::found(c),
                None => ConditionMeasure::missing(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl ConditionEvaluator for Failing {
        async fn measure(
            &self,
            _condition: &Condition,
            _cancel: &CancellationToken,
        ) -> ConditionResult<ConditionMeasure> {
            Err(ConditionError::Unavailable("no frame".to_string()))
        }
    }

    async fn eval(engine: &TriggerEngine, trigger: &Trigger, now: DateTime<Utc>) -> TriggerEvaluation {
        engine
            .evaluate(trigger, now, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_trigger() {
        let engine = TriggerEngine::default();
        let mut trigger = delay(0);
        trigger.disable();

        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Disabled);
        assert_eq!(evaluation.result.reason, reasons::TRIGGER_DISABLED);
        assert!(evaluation.established_enabled_at.is_none());
    }

    #[tokio::test]
    async fn test_zero_delay_satisfied_on_first_evaluation() {
        let engine = TriggerEngine::default();
        let evaluation = eval(&engine, &delay(0), t0()).await;

        assert_eq!(evaluation.status(), TriggerStatus::Satisfied);
        assert_eq!(evaluation.established_enabled_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_delay_progression() {
        let engine = TriggerEngine::default();
        let trigger = delay(30);

        let first = eval(&engine, &trigger, t0()).await;
        assert_eq!(first.status(), TriggerStatus::Pending);
        assert_eq!(first.result.reason, reasons::DELAY_PENDING_INITIAL);

        let trigger = trigger.with_evaluation(&first);
        let second = eval(&engine, &trigger, t0() + Duration::seconds(29)).await;
        assert_eq!(second.result.reason, reasons::WAITING_DELAY);
        assert!(second.established_enabled_at.is_none());

        let third = eval(&engine, &trigger, t0() + Duration::seconds(30)).await;
        assert_eq!(third.status(), TriggerStatus::Satisfied);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_regardless_of_condition() {
        let scores = FixedScore::new(Some(1.0));
        let engine = TriggerEngine::new(Some(scores.clone()));

        let mut trigger = image("target").with_cooldown(60);
        trigger.last_fired_at = Some(t0());

        let evaluation = eval(&engine, &trigger, t0() + Duration::seconds(59)).await;
        assert_eq!(evaluation.status(), TriggerStatus::Cooldown);
        assert_eq!(evaluation.result.reason, reasons::COOLDOWN_ACTIVE);
        assert_eq!(scores.calls.load(Ordering::SeqCst), 0);

        let evaluation = eval(&engine, &trigger, t0() + Duration::seconds(60)).await;
        assert_eq!(evaluation.status(), TriggerStatus::Satisfied);
        assert_eq!(scores.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_cools_down() {
        let engine = TriggerEngine::default();
        let mut trigger = delay(0);
        trigger.last_fired_at = Some(t0());
        trigger.enabled_at = Some(t0());

        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Satisfied);
    }

    #[tokio::test]
    async fn test_out_of_range_spans_never_elapse() {
        let engine = TriggerEngine::default();

        let mut trigger = delay(10_u64.pow(16));
        trigger.enabled_at = Some(t0() - Duration::days(365));
        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Pending);
        assert_eq!(evaluation.result.reason, reasons::WAITING_DELAY);

        let evaluation = eval(&engine, &delay(u64::MAX), t0()).await;
        assert_eq!(evaluation.result.reason, reasons::DELAY_PENDING_INITIAL);

        let mut trigger = delay(0).with_cooldown(10_u64.pow(16));
        trigger.enabled_at = Some(t0());
        trigger.last_fired_at = Some(t0() - Duration::days(365));
        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Cooldown);

        trigger.cooldown_seconds = u64::MAX;
        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Cooldown);
    }

    #[tokio::test]
    async fn test_schedule_in_past_at_enable() {
        let engine = TriggerEngine::default();
        let trigger = schedule(t0() - Duration::minutes(1));

        let evaluation = eval(&engine, &trigger, t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Disabled);
        assert_eq!(evaluation.result.reason, reasons::SCHEDULE_IN_PAST);

        // stays disabled on later cycles
        let trigger = trigger.with_evaluation(&evaluation);
        let later = eval(&engine, &trigger, t0() + Duration::minutes(5)).await;
        assert_eq!(later.result.reason, reasons::SCHEDULE_IN_PAST);
    }

    #[tokio::test]
    async fn test_schedule_waits_then_fires() {
        let engine = TriggerEngine::default();
        let trigger = schedule(t0() + Duration::seconds(10));

        let first = eval(&engine, &trigger, t0()).await;
        assert_eq!(first.result.reason, reasons::WAITING_FOR_TIME);

        let trigger = trigger.with_evaluation(&first);
        let fired = eval(&engine, &trigger, t0() + Duration::seconds(10)).await;
        assert_eq!(fired.status(), TriggerStatus::Satisfied);
        assert_eq!(fired.result.reason, reasons::TIME_REACHED);
    }

    #[tokio::test]
    async fn test_match_threshold() {
        let engine = TriggerEngine::new(Some(FixedScore::new(Some(0.9))));
        let evaluation = eval(&engine, &image("t"), t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Satisfied);
        assert_eq!(evaluation.result.confidence, Some(0.9));

        let engine = TriggerEngine::new(Some(FixedScore::new(Some(0.5))));
        let evaluation = eval(&engine, &image("t"), t0()).await;
        assert_eq!(evaluation.status(), TriggerStatus::Pending);
        assert_eq!(evaluation.result.reason, reasons::MATCH_NOT_FOUND);
        assert_eq!(evaluation.result.confidence, Some(0.5));
    }

    #[tokio::test]
    async fn test_match_without_evaluator() {
        let engine = TriggerEngine::new(None);
        let evaluation = eval(&engine, &image("t"), t0()).await;

        assert_eq!(evaluation.status(), TriggerStatus::Disabled);
        assert_eq!(evaluation.result.reason, reasons::NO_EVALUATOR);
    }

    #[tokio::test]
    async fn test_condition_failure_is_pending() {
        let engine = TriggerEngine::new(Some(Arc::new(Failing)));
        let evaluation = eval(&engine, &image("t"), t0()).await;

        assert_eq!(evaluation.status(), TriggerStatus::Pending);
        assert_eq!(evaluation.result.reason, reasons::CONDITION_ERROR);
    }

    #[tokio::test]
    async fn test_first_accepting_handler_wins() {
        // a handler list without the delay handler can't evaluate delays
        let engine = TriggerEngine::with_handlers(vec![TriggerHandler::Schedule(ScheduleHandler)]);
        let evaluation = eval(&engine, &delay(0), t0()).await;
        assert_eq!(evaluation.result.reason, reasons::NO_EVALUATOR);
    }

    #[tokio::test]
    async fn test_cancelled_before_evaluation() {
        let engine = TriggerEngine::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.evaluate(&delay(0), t0(), &cancel).await;
        assert!(matches!(result, Err(TriggerError::Cancelled)));
    }
}
