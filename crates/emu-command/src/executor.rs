//! Command graph executor
//!
//! A command is an ordered list of steps, each either an action (a batch of
//! input events sent to a session) or another command. Execution is
//! depth-first; a command that re-enters itself on the current path is a
//! cycle and aborts the call. Siblings may share sub-commands.

use chrono::{DateTime, Utc};
use emu_core::{
    Action, CancellationToken, Command, CommandStepType, RepositoryError, SessionError,
    SessionHost, SessionState, SharedRepository,
};
use emu_trigger::{Trigger, TriggerEngine, TriggerError, TriggerStatus};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Reason reported when a command has no trigger
pub const NO_TRIGGER: &str = "no_trigger";

/// Command execution errors
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Session {id} is not running (state: {state:?})")]
    InvalidState { id: String, state: SessionState },

    #[error("Cycle detected at command {command_id} (path: {})", .path.join(" -> "))]
    CycleDetected { command_id: String, path: Vec<String> },

    #[error("Input dispatch failed: {0}")]
    Dispatch(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Trigger error: {0}")]
    Trigger(TriggerError),

    #[error("Command execution cancelled")]
    Cancelled,
}

impl CommandError {
    fn not_found(kind: &'static str, id: &str) -> Self {
        CommandError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<TriggerError> for CommandError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::Cancelled => CommandError::Cancelled,
            other => CommandError::Trigger(other),
        }
    }
}

impl From<SessionError> for CommandError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => CommandError::NotFound { kind: "Session", id },
            SessionError::NotRunning { id, state } => CommandError::InvalidState { id, state },
            SessionError::Dispatch(message) => CommandError::Dispatch(message),
        }
    }
}

/// Result type for command execution
pub type CommandResult<T> = Result<T, CommandError>;

/// Outcome of a trigger-gated execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecutionOutcome {
    /// Input events accepted by the session
    pub accepted: usize,

    /// Status of the command's trigger, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_status: Option<TriggerStatus>,

    pub reason: String,
}

impl CommandExecutionOutcome {
    pub fn executed(&self) -> bool {
        matches!(self.trigger_status, None | Some(TriggerStatus::Satisfied))
    }
}

/// Executes commands against sessions
pub struct CommandExecutor {
    commands: SharedRepository<Command>,
    actions: SharedRepository<Action>,
    triggers: SharedRepository<Trigger>,
    sessions: Arc<dyn SessionHost>,
    engine: Arc<TriggerEngine>,

    /// Fixed trigger evaluation time (for testing)
    time_override: Option<DateTime<Utc>>,
}

impl CommandExecutor {
    pub fn new(
        commands: SharedRepository<Command>,
        actions: SharedRepository<Action>,
        triggers: SharedRepository<Trigger>,
        sessions: Arc<dyn SessionHost>,
        engine: Arc<TriggerEngine>,
    ) -> Self {
        Self {
            commands,
            actions,
            triggers,
            sessions,
            engine,
            time_override: None,
        }
    }

    /// Evaluate triggers at a fixed time
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time_override = Some(time);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.time_override.unwrap_or_else(Utc::now)
    }

    /// Run a command regardless of its trigger
    ///
    /// Returns the total number of input events the session accepted.
    pub async fn force_execute(
        &self,
        session_id: &str,
        command_id: &str,
        cancel: &CancellationToken,
    ) -> CommandResult<usize> {
        self.require_running(session_id).await?;

        let mut path = Vec::new();
        let accepted = self
            .execute_command(session_id, command_id, &mut path, cancel)
            .await?;

        info!(session_id, command_id, accepted, "Command executed");
        Ok(accepted)
    }

    /// Run a command only if its trigger is satisfied
    ///
    /// Commands without a trigger run unconditionally. A satisfied trigger
    /// has its firing state persisted before the command runs. Any other
    /// status leaves the session untouched; only a baseline established by
    /// this evaluation is persisted.
    pub async fn evaluate_and_execute(
        &self,
        session_id: &str,
        command_id: &str,
        cancel: &CancellationToken,
    ) -> CommandResult<CommandExecutionOutcome> {
        self.require_running(session_id).await?;

        let command = self
            .commands
            .get(command_id)
            .await?
            .ok_or_else(|| CommandError::not_found("Command", command_id))?;

        let Some(trigger_id) = command.trigger_id.as_deref() else {
            let accepted = self.force_execute(session_id, command_id, cancel).await?;
            return Ok(CommandExecutionOutcome {
                accepted,
                trigger_status: None,
                reason: NO_TRIGGER.to_string(),
            });
        };

        let trigger = self
            .triggers
            .get(trigger_id)
            .await?
            .ok_or_else(|| CommandError::not_found("Trigger", trigger_id))?;

        let evaluation = self.engine.evaluate(&trigger, self.now(), cancel).await?;
        let status = evaluation.status();
        let reason = evaluation.result.reason.clone();

        if status != TriggerStatus::Satisfied {
            debug!(command_id, trigger_id, status = ?status, reason = %reason, "Trigger not satisfied");
            if let Some(enabled_at) = evaluation.established_enabled_at {
                let mut baseline = trigger;
                baseline.enabled_at = Some(enabled_at);
                self.triggers.upsert(baseline).await?;
            }
            return Ok(CommandExecutionOutcome {
                accepted: 0,
                trigger_status: Some(status),
                reason,
            });
        }

        self.triggers
            .upsert(trigger.with_evaluation(&evaluation))
            .await?;

        let accepted = self.force_execute(session_id, command_id, cancel).await?;
        Ok(CommandExecutionOutcome {
            accepted,
            trigger_status: Some(status),
            reason,
        })
    }

    async fn require_running(&self, session_id: &str) -> CommandResult<()> {
        let session = self
            .sessions
            .session(session_id)
            .await
            .ok_or_else(|| CommandError::not_found("Session", session_id))?;

        if !session.is_running() {
            warn!(session_id, state = ?session.state, "Session not running");
            return Err(CommandError::InvalidState {
                id: session.id,
                state: session.state,
            });
        }
        Ok(())
    }

    /// Depth-first execution; `path` holds the lowercased ids on the stack
    fn execute_command<'a>(
        &'a self,
        session_id: &'a str,
        command_id: &'a str,
        path: &'a mut Vec<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, CommandResult<usize>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled);
            }

            let key = command_id.to_lowercase();
            if path.contains(&key) {
                warn!(command_id, path = ?path, "Command cycle detected");
                let mut cycle = path.clone();
                cycle.push(key);
                return Err(CommandError::CycleDetected {
                    command_id: command_id.to_string(),
                    path: cycle,
                });
            }

            let command = self
                .commands
                .get(command_id)
                .await?
                .ok_or_else(|| CommandError::not_found("Command", command_id))?;

            path.push(key);
            let mut accepted = 0;

            for step in command.ordered_steps() {
                trace!(command_id, step_type = ?step.step_type, target = %step.target_id, "Command step");
                accepted += match step.step_type {
                    CommandStepType::Action => {
                        self.dispatch_action(session_id, &step.target_id).await?
                    }
                    CommandStepType::Command => {
                        self.execute_command(session_id, &step.target_id, path, cancel)
                            .await?
                    }
                };
            }

            path.pop();
            Ok(accepted)
        })
    }

    async fn dispatch_action(&self, session_id: &str, action_id: &str) -> CommandResult<usize> {
        let action = self
            .actions
            .get(action_id)
            .await?
            .ok_or_else(|| CommandError::not_found("Action", action_id))?;

        if !action.has_inputs() {
            debug!(action_id, "Action has no inputs");
            return Ok(0);
        }

        let accepted = self.sessions.send_inputs(session_id, &action.inputs).await?;
        debug!(action_id, sent = action.inputs.len(), accepted, "Action dispatched");
        Ok(accepted)
    }
}
