//! Execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall outcome of a sequence run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceStatus {
    Succeeded,
    Failed,
    NotFound,
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Outcome of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Branch taken by an `ifElse` block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    Then,
    Else,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub command_id: String,
    pub order: i32,
    pub status: StepStatus,

    /// Delay applied before the step
    pub delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResult {
    /// Block type as written in the record
    pub block_type: String,
    pub iterations: u32,
    pub conditions_evaluated: u32,
    pub duration_ms: u64,
    pub status: BlockStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockResult {
    pub fn is_failed(&self) -> bool {
        self.status == BlockStatus::Failed
    }
}

/// Result of one sequence run
///
/// Step and block outcomes are appended in the order they finish, so a
/// nested block is recorded before the block that contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecutionResult {
    pub sequence_id: String,
    pub status: SequenceStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepResult>,

    #[serde(default)]
    pub blocks: Vec<BlockResult>,
}

impl SequenceExecutionResult {
    pub fn not_found(sequence_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            sequence_id: sequence_id.into(),
            status: SequenceStatus::NotFound,
            started_at: now,
            completed_at: now,
            error: None,
            steps: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == SequenceStatus::Succeeded
    }

    /// Commands attempted, in order
    pub fn command_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.command_id.as_str()).collect()
    }
}
