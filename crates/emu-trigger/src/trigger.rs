//! Trigger types
//!
//! A trigger is a persisted condition with enable/cooldown state. Each
//! evaluation produces a [`TriggerEvaluationResult`]; the trigger records the
//! latest one together with when it was evaluated and when it last fired.

use chrono::{DateTime, Utc};
use emu_core::{Condition, ConditionMode, ConditionSource, Record, Region, RepositoryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trigger errors
#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("Invalid trigger configuration: {0}")]
    InvalidConfig(String),

    #[error("Trigger not found: {0}")]
    NotFound(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to persist {} of {evaluated} evaluated triggers: {message}", .failed.len())]
    PersistFailed {
        evaluated: usize,
        failed: Vec<String>,
        message: String,
    },

    #[error("Trigger evaluation cancelled")]
    Cancelled,
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Trigger type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerType {
    #[serde(alias = "Delay")]
    Delay,
    #[serde(alias = "Schedule")]
    Schedule,
    #[serde(alias = "ImageMatch", alias = "image_match")]
    ImageMatch,
    #[serde(alias = "TextMatch", alias = "text_match")]
    TextMatch,
}

impl TriggerType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Delay => "delay",
            TriggerType::Schedule => "schedule",
            TriggerType::ImageMatch => "imageMatch",
            TriggerType::TextMatch => "textMatch",
        }
    }
}

/// Delay trigger parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DelayParams {
    /// Seconds to wait after the trigger was enabled
    #[serde(default)]
    pub seconds: u64,
}

/// Schedule trigger parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParams {
    /// Absolute time at which the trigger fires
    #[serde(alias = "time", alias = "timestamp")]
    pub at: DateTime<Utc>,
}

/// Default similarity for image matching when none is configured
pub const DEFAULT_IMAGE_THRESHOLD: f64 = 0.9;

/// Default OCR confidence for text matching when none is configured
pub const DEFAULT_TEXT_THRESHOLD: f64 = 0.8;

/// Image/text match parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchParams {
    /// Image id or text to look for
    #[serde(alias = "imageId", alias = "text")]
    pub target_id: String,

    /// Minimum similarity/confidence
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "threshold")]
    pub confidence_threshold: Option<f64>,

    /// Present or absent
    #[serde(default)]
    pub mode: ConditionMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl MatchParams {
    /// Build the condition handed to the condition evaluator
    pub fn to_condition(&self, source: ConditionSource) -> Condition {
        let default_threshold = match source {
            ConditionSource::Image => DEFAULT_IMAGE_THRESHOLD,
            ConditionSource::Text => DEFAULT_TEXT_THRESHOLD,
        };

        Condition {
            source,
            target_id: self.target_id.clone(),
            mode: self.mode,
            confidence_threshold: Some(self.confidence_threshold.unwrap_or(default_threshold)),
            region: self.region,
            language: self.language.clone(),
        }
    }
}

/// Type-specific trigger definition
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    Delay(DelayParams),
    Schedule(ScheduleParams),
    ImageMatch(MatchParams),
    TextMatch(MatchParams),
}

impl TriggerKind {
    /// Get the type tag
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerKind::Delay(_) => TriggerType::Delay,
            TriggerKind::Schedule(_) => TriggerType::Schedule,
            TriggerKind::ImageMatch(_) => TriggerType::ImageMatch,
            TriggerKind::TextMatch(_) => TriggerType::TextMatch,
        }
    }

    fn from_params(trigger_type: TriggerType, params: serde_json::Value) -> TriggerResult<Self> {
        let params = if params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            params
        };

        let invalid =
            |e: serde_json::Error| TriggerError::InvalidConfig(format!("{}: {}", trigger_type.as_str(), e));

        Ok(match trigger_type {
            TriggerType::Delay => TriggerKind::Delay(serde_json::from_value(params).map_err(invalid)?),
            TriggerType::Schedule => {
                TriggerKind::Schedule(serde_json::from_value(params).map_err(invalid)?)
            }
            TriggerType::ImageMatch => {
                TriggerKind::ImageMatch(serde_json::from_value(params).map_err(invalid)?)
            }
            TriggerType::TextMatch => {
                TriggerKind::TextMatch(serde_json::from_value(params).map_err(invalid)?)
            }
        })
    }

    fn params_value(&self) -> serde_json::Value {
        let value = match self {
            TriggerKind::Delay(p) => serde_json::to_value(p),
            TriggerKind::Schedule(p) => serde_json::to_value(p),
            TriggerKind::ImageMatch(p) | TriggerKind::TextMatch(p) => serde_json::to_value(p),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Outcome class of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerStatus {
    Disabled,
    Cooldown,
    Pending,
    Satisfied,
}

/// Reason codes reported with evaluation results
pub mod reasons {
    pub const TRIGGER_DISABLED: &str = "trigger_disabled";
    pub const COOLDOWN_ACTIVE: &str = "cooldown_active";
    pub const NO_EVALUATOR: &str = "No evaluator for trigger type";
    pub const DELAY_PENDING_INITIAL: &str = "delay_pending_initial";
    pub const WAITING_DELAY: &str = "waiting_delay";
    pub const DELAY_ELAPSED: &str = "delay_elapsed";
    pub const SCHEDULE_IN_PAST: &str = "scheduled_time_in_past_when_enabled";
    pub const WAITING_FOR_TIME: &str = "waiting_for_time";
    pub const TIME_REACHED: &str = "time_reached";
    pub const MATCH_FOUND: &str = "match_found";
    pub const MATCH_NOT_FOUND: &str = "match_not_found";
    pub const CONDITION_ERROR: &str = "condition_error";
}

/// Immutable result of evaluating a trigger once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvaluationResult {
    pub status: TriggerStatus,

    /// Machine-readable reason code
    pub reason: String,

    pub evaluated_at: DateTime<Utc>,

    /// Similarity/confidence reported by match evaluators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl TriggerEvaluationResult {
    /// Create a result without confidence
    pub fn new(status: TriggerStatus, reason: impl Into<String>, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            status,
            reason: reason.into(),
            evaluated_at,
            confidence: None,
        }
    }

    pub fn disabled(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(TriggerStatus::Disabled, reason, at)
    }

    pub fn cooldown(at: DateTime<Utc>) -> Self {
        Self::new(TriggerStatus::Cooldown, reasons::COOLDOWN_ACTIVE, at)
    }

    pub fn pending(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(TriggerStatus::Pending, reason, at)
    }

    pub fn satisfied(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(TriggerStatus::Satisfied, reason, at)
    }

    /// Attach a confidence score
    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn is_satisfied(&self) -> bool {
        self.status == TriggerStatus::Satisfied
    }
}

/// Result of an evaluation plus the baseline timestamp it established
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvaluation {
    pub result: TriggerEvaluationResult,

    /// Set when this evaluation established `enabled_at` for the first time
    pub established_enabled_at: Option<DateTime<Utc>>,
}

impl TriggerEvaluation {
    /// Evaluation that didn't touch the baseline
    pub fn from_result(result: TriggerEvaluationResult) -> Self {
        Self {
            result,
            established_enabled_at: None,
        }
    }

    pub fn status(&self) -> TriggerStatus {
        self.result.status
    }
}

/// Stored trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TriggerRecord", into = "TriggerRecord")]
pub struct Trigger {
    pub id: String,
    pub name: Option<String>,
    pub kind: TriggerKind,
    pub enabled: bool,

    /// Minimum seconds between firings
    pub cooldown_seconds: u64,

    /// Baseline for delay/schedule triggers, set once
    pub enabled_at: Option<DateTime<Utc>>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_result: Option<TriggerEvaluationResult>,
}

impl Trigger {
    /// Create an enabled trigger with no evaluation history
    pub fn new(id: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            enabled: true,
            cooldown_seconds: 0,
            enabled_at: None,
            last_evaluated_at: None,
            last_fired_at: None,
            last_result: None,
        }
    }

    /// Set cooldown
    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Get display name (name or ID)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.kind.trigger_type()
    }

    /// Enable the trigger, starting a fresh baseline if it was disabled
    pub fn enable(&mut self) {
        if !self.enabled {
            self.enabled = true;
            self.enabled_at = None;
        }
    }

    /// Disable the trigger
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Fold an evaluation into the trigger's state
    ///
    /// `last_evaluated_at` and `last_result` always change; `last_fired_at`
    /// only on a satisfied result; `enabled_at` only if still unset.
    pub fn with_evaluation(mut self, evaluation: &TriggerEvaluation) -> Self {
        if self.enabled_at.is_none() {
            self.enabled_at = evaluation.established_enabled_at;
        }

        let result = &evaluation.result;
        self.last_evaluated_at = Some(result.evaluated_at);
        if result.is_satisfied() {
            self.last_fired_at = Some(result.evaluated_at);
        }
        self.last_result = Some(result.clone());
        self
    }
}

impl Record for Trigger {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Flat wire shape of a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRecord {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type")]
    trigger_type: TriggerType,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    cooldown_seconds: u64,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_evaluated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_fired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_result: Option<TriggerEvaluationResult>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<TriggerRecord> for Trigger {
    type Error = TriggerError;

    fn try_from(record: TriggerRecord) -> TriggerResult<Self> {
        if record.id.trim().is_empty() {
            return Err(TriggerError::InvalidConfig("trigger id is empty".to_string()));
        }

        Ok(Self {
            kind: TriggerKind::from_params(record.trigger_type, record.params)?,
            id: record.id,
            name: record.name,
            enabled: record.enabled,
            cooldown_seconds: record.cooldown_seconds,
            enabled_at: record.enabled_at,
            last_evaluated_at: record.last_evaluated_at,
            last_fired_at: record.last_fired_at,
            last_result: record.last_result,
        })
    }
}

impl From<Trigger> for TriggerRecord {
    fn from(trigger: Trigger) -> Self {
        Self {
            params: trigger.kind.params_value(),
            trigger_type: trigger.kind.trigger_type(),
            id: trigger.id,
            name: trigger.name,
            enabled: trigger.enabled,
            cooldown_seconds: trigger.cooldown_seconds,
            enabled_at: trigger.enabled_at,
            last_evaluated_at: trigger.last_evaluated_at,
            last_fired_at: trigger.last_fired_at,
            last_result: trigger.last_result,
        }
    }
}
