//! Session boundary
//!
//! Sessions are the live emulator instances inputs are sent to. How they are
//! created and how inputs travel to them is outside this workspace; the core
//! only needs to look a session up and hand it a batch of inputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::InputEvent;

/// Session errors
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {id} is not running (state: {state:?})")]
    NotRunning { id: String, state: SessionState },

    #[error("Input dispatch failed: {0}")]
    Dispatch(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

/// Snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub state: SessionState,
}

impl Session {
    /// A running session
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Running,
        }
    }

    /// Whether inputs can be delivered
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }
}

/// External collaborator that owns sessions and delivers inputs
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Look up a session
    async fn session(&self, session_id: &str) -> Option<Session>;

    /// Whether any session is currently running
    async fn has_running_sessions(&self) -> bool;

    /// Deliver inputs to a session, returning how many were accepted
    async fn send_inputs(&self, session_id: &str, inputs: &[InputEvent]) -> SessionResult<usize>;
}
