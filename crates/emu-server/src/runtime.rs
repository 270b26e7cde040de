//! Automation runtime
//!
//! Wires the configured seeds into in-memory repositories and builds the
//! trigger coordinator, poller, command executor and sequence runner on top
//! of them.

use anyhow::{Context, Result};
use emu_command::{CommandExecutor, SessionCommandRunner};
use emu_config::AutomationConfig;
use emu_core::{CancellationToken, ConditionEvaluator, MemoryRepository};
use emu_sequence::{ExecutionHooks, SequenceExecutionResult, SequenceRunner};
use emu_trigger::{PollerMetricsSnapshot, TriggerCoordinator, TriggerEngine, TriggerPoller};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::host::{DryRunSessions, NoConditions};

/// Everything the service runs, built from one configuration
pub struct AutomationRuntime {
    sessions: Arc<DryRunSessions>,
    conditions: Arc<dyn ConditionEvaluator>,
    executor: Arc<CommandExecutor>,
    sequences: SequenceRunner,
    poller: Option<Arc<TriggerPoller>>,
}

impl AutomationRuntime {
    pub fn from_config(config: &AutomationConfig) -> Self {
        let sessions = Arc::new(DryRunSessions::new(config.sessions.iter().cloned()));
        let conditions: Arc<dyn ConditionEvaluator> = Arc::new(NoConditions);
        let engine = Arc::new(TriggerEngine::new(Some(conditions.clone())));

        let triggers = Arc::new(MemoryRepository::with_records(config.triggers.clone()));
        let actions = Arc::new(MemoryRepository::with_records(config.actions.clone()));
        let commands = Arc::new(MemoryRepository::with_records(config.commands.clone()));
        let sequences = Arc::new(MemoryRepository::with_records(config.sequences.clone()));

        let executor = Arc::new(CommandExecutor::new(
            commands,
            actions,
            triggers.clone(),
            sessions.clone(),
            engine.clone(),
        ));

        let poller = config.poller.enabled.then(|| {
            let coordinator = Arc::new(TriggerCoordinator::new(triggers, engine));
            Arc::new(TriggerPoller::new(
                coordinator,
                sessions.clone(),
                config.poller.to_poller_config(),
            ))
        });

        Self {
            sessions,
            conditions,
            executor,
            sequences: SequenceRunner::new(sequences),
            poller,
        }
    }

    /// Start the trigger poller, if enabled
    pub fn start(&self, cancel: &CancellationToken) -> Option<JoinHandle<()>> {
        match &self.poller {
            Some(poller) => Some(poller.clone().start(cancel.clone())),
            None => {
                info!("Trigger poller disabled");
                None
            }
        }
    }

    /// Run one sequence against a session
    ///
    /// With `respect_triggers`, steps whose command trigger is not satisfied
    /// succeed without dispatching anything.
    pub async fn run_sequence(
        &self,
        session_id: &str,
        sequence_id: &str,
        respect_triggers: bool,
        cancel: &CancellationToken,
    ) -> Result<SequenceExecutionResult> {
        let mut commands = SessionCommandRunner::new(self.executor.clone(), session_id);
        if respect_triggers {
            commands = commands.respecting_triggers();
        }
        let hooks = ExecutionHooks::new(&commands).with_conditions(self.conditions.as_ref());

        let result = self
            .sequences
            .execute(sequence_id, hooks, cancel)
            .await
            .with_context(|| format!("running sequence {sequence_id} on {session_id}"))?;

        if result.is_succeeded() {
            info!(sequence_id, session_id, steps = result.steps.len(), "Sequence finished");
        } else {
            warn!(sequence_id, session_id, status = ?result.status, error = ?result.error, "Sequence did not succeed");
        }
        Ok(result)
    }

    pub fn poller_metrics(&self) -> Option<PollerMetricsSnapshot> {
        self.poller.as_ref().map(|p| p.metrics().snapshot())
    }

    pub fn dispatched_inputs(&self) -> u64 {
        self.sessions.dispatched()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_config::PollerSettings;
    use emu_core::{Action, Command, CommandStep, InputEvent};
    use emu_sequence::{Sequence, SequenceStatus, SequenceStep};
    use emu_trigger::Trigger;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> AutomationConfig {
        let trigger: Trigger = serde_json::from_value(json!({
            "id": "now",
            "type": "delay",
            "params": {"seconds": 0}
        }))
        .unwrap();

        AutomationConfig {
            sessions: vec!["emu-1".to_string()],
            triggers: vec![trigger],
            actions: vec![Action::new("press-a", vec![InputEvent::key("A")])],
            commands: vec![
                Command::new("jump", vec![CommandStep::action("press-a", 0)]).with_trigger("now"),
            ],
            sequences: vec![Sequence::new("twice")
                .with_step(SequenceStep::new("jump", 0))
                .with_step(SequenceStep::new("jump", 1))],
            ..AutomationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_sequence_dispatches_inputs() {
        let runtime = AutomationRuntime::from_config(&config());
        let cancel = CancellationToken::new();

        let result = runtime.run_sequence("emu-1", "twice", false, &cancel).await.unwrap();
        assert_eq!(result.status, SequenceStatus::Succeeded);
        assert_eq!(runtime.dispatched_inputs(), 2);

        let result = runtime.run_sequence("emu-1", "missing", false, &cancel).await.unwrap();
        assert_eq!(result.status, SequenceStatus::NotFound);
    }

    #[tokio::test]
    async fn test_respecting_triggers_skips_cooling_commands() {
        let mut config = config();
        config.triggers[0].cooldown_seconds = 3600;
        let runtime = AutomationRuntime::from_config(&config);

        let result = runtime
            .run_sequence("emu-1", "twice", true, &CancellationToken::new())
            .await
            .unwrap();

        // first step fires the trigger, the second finds it cooling down
        assert_eq!(result.status, SequenceStatus::Succeeded);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(runtime.dispatched_inputs(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_fails_sequence() {
        let runtime = AutomationRuntime::from_config(&config());

        let result = runtime
            .run_sequence("emu-9", "twice", false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, SequenceStatus::Failed);
        assert_eq!(runtime.dispatched_inputs(), 0);
    }

    #[tokio::test]
    async fn test_disabled_poller_does_not_start() {
        let mut config = config();
        config.poller = PollerSettings {
            enabled: false,
            ..PollerSettings::default()
        };
        let runtime = AutomationRuntime::from_config(&config);

        assert!(runtime.start(&CancellationToken::new()).is_none());
        assert!(runtime.poller_metrics().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_runs_until_cancelled() {
        let runtime = AutomationRuntime::from_config(&config());
        let cancel = CancellationToken::new();

        let handle = runtime.start(&cancel).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let metrics = runtime.poller_metrics().unwrap();
        assert_eq!(metrics.cycles_started, 3);
        assert_eq!(metrics.idle_skips, 0);
    }
}
