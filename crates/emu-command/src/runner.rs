//! Sequence step runner backed by the command executor

use async_trait::async_trait;
use emu_core::CancellationToken;
use emu_sequence::{CommandRunner, SequenceError, SequenceResult};
use std::sync::Arc;
use tracing::debug;

use crate::executor::{CommandError, CommandExecutor};

/// Runs sequence steps as commands on one session
pub struct SessionCommandRunner {
    executor: Arc<CommandExecutor>,
    session_id: String,
    respect_triggers: bool,
}

impl SessionCommandRunner {
    /// Runner that force-executes every command
    pub fn new(executor: Arc<CommandExecutor>, session_id: impl Into<String>) -> Self {
        Self {
            executor,
            session_id: session_id.into(),
            respect_triggers: false,
        }
    }

    /// Only run commands whose trigger is satisfied
    pub fn respecting_triggers(mut self) -> Self {
        self.respect_triggers = true;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl CommandRunner for SessionCommandRunner {
    async fn execute(&self, command_id: &str, cancel: &CancellationToken) -> SequenceResult<()> {
        let result = if self.respect_triggers {
            self.executor
                .evaluate_and_execute(&self.session_id, command_id, cancel)
                .await
                .map(|outcome| outcome.accepted)
        } else {
            self.executor
                .force_execute(&self.session_id, command_id, cancel)
                .await
        };

        match result {
            Ok(accepted) => {
                debug!(session_id = %self.session_id, command_id, accepted, "Sequence step dispatched");
                Ok(())
            }
            Err(CommandError::Cancelled) => Err(SequenceError::Cancelled),
            Err(e) => Err(SequenceError::Command {
                command_id: command_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
