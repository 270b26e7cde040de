//! Sequence definition
//!
//! A sequence is an ordered list of command steps followed by control blocks.
//! Blocks stay as raw JSON until they are executed so that a malformed block
//! fails on its own instead of making the whole sequence unloadable.

use emu_core::{Condition, ConditionError, Record, RepositoryError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Sequence errors
#[derive(Debug, Clone, Error)]
pub enum SequenceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Condition error: {0}")]
    Condition(ConditionError),

    #[error("No condition evaluator available")]
    MissingConditionEvaluator,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Command {command_id} failed: {message}")]
    Command { command_id: String, message: String },

    #[error("Gating timeout reached")]
    GateTimeout,

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Nested {0} block failed")]
    NestedBlockFailed(String),

    #[error("Maximum iterations reached ({0})")]
    MaxIterations(u32),

    #[error("Block timeout reached")]
    Timeout,

    #[error("Sequence execution cancelled")]
    Cancelled,
}

impl From<ConditionError> for SequenceError {
    fn from(e: ConditionError) -> Self {
        match e {
            ConditionError::Cancelled => SequenceError::Cancelled,
            other => SequenceError::Condition(other),
        }
    }
}

/// Result type for sequence operations
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Inclusive random delay bounds, in either order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    /// Uniform sample from `[min(a, b), max(a, b)]`
    pub fn sample(&self) -> u64 {
        let lo = self.min_ms.min(self.max_ms);
        let hi = self.min_ms.max(self.max_ms);
        rand::thread_rng().gen_range(lo..=hi)
    }
}

/// One command invocation in a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStep {
    pub command_id: String,

    #[serde(default)]
    pub order: i32,

    /// Fixed delay before the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Random delay before the step (takes precedence over `delay_ms`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_range: Option<DelayRange>,

    /// Wait until this holds before running the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Condition>,

    /// Gate deadline; without one the gate is polled until cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SequenceStep {
    pub fn new(command_id: impl Into<String>, order: i32) -> Self {
        Self {
            command_id: command_id.into(),
            order,
            delay_ms: None,
            delay_range: None,
            gate: None,
            timeout_ms: None,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_gate(mut self, gate: Condition, timeout_ms: Option<u64>) -> Self {
        self.gate = Some(gate);
        self.timeout_ms = timeout_ms;
        self
    }

    /// Delay to apply before this step
    pub fn delay(&self) -> Duration {
        let ms = match (self.delay_range, self.delay_ms) {
            (Some(range), _) => range.sample(),
            (None, Some(ms)) => ms,
            (None, None) => 0,
        };
        Duration::from_millis(ms)
    }
}

/// Stored sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub steps: Vec<SequenceStep>,

    /// Raw block records, parsed when executed
    #[serde(default)]
    pub blocks: Vec<serde_json::Value>,
}

impl Sequence {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            steps: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: SequenceStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_block(mut self, block: serde_json::Value) -> Self {
        self.blocks.push(block);
        self
    }

    /// Get display name (name or ID)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Steps in ascending `order`, ties in declaration order
    pub fn ordered_steps(&self) -> Vec<&SequenceStep> {
        let mut steps: Vec<&SequenceStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

impl Record for Sequence {
    fn record_id(&self) -> &str {
        &self.id
    }
}
