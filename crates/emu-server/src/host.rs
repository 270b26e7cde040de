//! Stand-in collaborators for running without real emulators
//!
//! `DryRunSessions` reports the configured sessions as running and accepts
//! every input it is handed. `NoConditions` answers every condition with
//! `Unavailable`, so match triggers stay pending and gates fail closed.

use async_trait::async_trait;
use emu_core::{
    CancellationToken, Condition, ConditionError, ConditionEvaluator, ConditionMeasure,
    ConditionResult, InputEvent, Session, SessionError, SessionHost, SessionResult,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Session host that logs dispatched inputs instead of sending them
pub struct DryRunSessions {
    sessions: HashSet<String>,
    dispatched: AtomicU64,
}

impl DryRunSessions {
    pub fn new(sessions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sessions: sessions.into_iter().map(Into::into).collect(),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Total input events accepted so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionHost for DryRunSessions {
    async fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .contains(session_id)
            .then(|| Session::running(session_id))
    }

    async fn has_running_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    async fn send_inputs(&self, session_id: &str, inputs: &[InputEvent]) -> SessionResult<usize> {
        if !self.sessions.contains(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        for input in inputs {
            info!(session_id, input = ?input, "Dry-run input");
        }
        self.dispatched
            .fetch_add(inputs.len() as u64, Ordering::Relaxed);
        Ok(inputs.len())
    }
}

/// Condition evaluator for hosts without screen capture
pub struct NoConditions;

#[async_trait]
impl ConditionEvaluator for NoConditions {
    async fn measure(
        &self,
        condition: &Condition,
        _cancel: &CancellationToken,
    ) -> ConditionResult<ConditionMeasure> {
        Err(ConditionError::Unavailable(format!(
            "no condition evaluator for target {}",
            condition.target_id
        )))
    }
}
