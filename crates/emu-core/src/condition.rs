//! Condition types
//!
//! A condition is a declarative check against the target's screen (an image
//! or a piece of text being present or absent). Conditions are computed by an
//! external [`ConditionEvaluator`]; this crate only describes them and decides
//! what a measurement means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Condition errors
#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("Invalid condition: {0}")]
    Invalid(String),

    #[error("Condition target not found: {0}")]
    TargetNotFound(String),

    #[error("Condition evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("Condition evaluation failed: {0}")]
    Failed(String),

    #[error("Condition evaluation cancelled")]
    Cancelled,
}

/// Result type for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// What the condition looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionSource {
    #[serde(alias = "image", alias = "IMAGE")]
    Image,
    #[serde(alias = "text", alias = "TEXT")]
    Text,
}

/// Whether the target must be present or absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConditionMode {
    #[default]
    #[serde(alias = "present")]
    Present,
    #[serde(alias = "absent")]
    Absent,
}

/// Screen region in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Condition definition
///
/// Wire format:
/// ```json
/// {"source": "Image", "targetId": "ok-button", "mode": "Present", "confidenceThreshold": 0.9}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Image or text
    pub source: ConditionSource,

    /// Image id or text to look for
    pub target_id: String,

    /// Present or absent
    #[serde(default)]
    pub mode: ConditionMode,

    /// Minimum confidence/similarity for a match (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    /// Restrict matching to this region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,

    /// OCR language hint for text conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Condition {
    /// Create a condition that requires `target_id` to be present
    pub fn present(source: ConditionSource, target_id: impl Into<String>) -> Self {
        Self {
            source,
            target_id: target_id.into(),
            mode: ConditionMode::Present,
            confidence_threshold: None,
            region: None,
            language: None,
        }
    }

    /// Create a condition that requires `target_id` to be absent
    pub fn absent(source: ConditionSource, target_id: impl Into<String>) -> Self {
        Self {
            mode: ConditionMode::Absent,
            ..Self::present(source, target_id)
        }
    }

    /// Set the confidence threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Parse a condition from a raw JSON record
    ///
    /// Returns an error instead of panicking on missing fields so callers can
    /// turn a malformed record into a failed result.
    pub fn from_value(value: &serde_json::Value) -> ConditionResult<Self> {
        let condition: Condition = serde_json::from_value(value.clone())
            .map_err(|e| ConditionError::Invalid(e.to_string()))?;
        condition.validate()?;
        Ok(condition)
    }

    /// Check field constraints serde can't express
    pub fn validate(&self) -> ConditionResult<()> {
        if self.target_id.trim().is_empty() {
            return Err(ConditionError::Invalid("targetId is empty".to_string()));
        }
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConditionError::Invalid(format!(
                    "confidenceThreshold {} is outside 0..=1",
                    threshold
                )));
            }
        }
        Ok(())
    }

    /// Decide whether a measurement satisfies this condition
    ///
    /// A target counts as found when the collaborator reported it and, if a
    /// threshold is configured and a confidence was reported, the confidence
    /// meets the threshold.
    pub fn is_satisfied_by(&self, measure: &ConditionMeasure) -> bool {
        let found = match (self.confidence_threshold, measure.confidence) {
            (Some(threshold), Some(confidence)) => measure.found && confidence >= threshold,
            _ => measure.found,
        };

        match self.mode {
            ConditionMode::Present => found,
            ConditionMode::Absent => !found,
        }
    }
}

/// Raw measurement returned by a condition evaluator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionMeasure {
    /// Whether the target was located at all
    pub found: bool,

    /// Similarity/confidence of the best match, if the evaluator scores
    pub confidence: Option<f64>,
}

impl ConditionMeasure {
    /// A match with the given confidence
    pub fn found(confidence: f64) -> Self {
        Self {
            found: true,
            confidence: Some(confidence),
        }
    }

    /// No match
    pub fn missing() -> Self {
        Self::default()
    }
}

/// External collaborator that computes conditions against a live target
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Locate the condition's target and report what was seen
    async fn measure(
        &self,
        condition: &Condition,
        cancel: &CancellationToken,
    ) -> ConditionResult<ConditionMeasure>;

    /// Evaluate the condition to a boolean
    async fn evaluate(
        &self,
        condition: &Condition,
        cancel: &CancellationToken,
    ) -> ConditionResult<bool> {
        let measure = self.measure(condition, cancel).await?;
        Ok(condition.is_satisfied_by(&measure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_deserialize_defaults() {
        let condition: Condition = serde_json::from_value(json!({
            "source": "Image",
            "targetId": "start-button"
        }))
        .unwrap();

        assert_eq!(condition.source, ConditionSource::Image);
        assert_eq!(condition.mode, ConditionMode::Present);
        assert!(condition.confidence_threshold.is_none());
        assert!(condition.region.is_none());
    }

    #[test]
    fn test_condition_full_record() {
        let condition = Condition::from_value(&json!({
            "source": "text",
            "targetId": "Game Over",
            "mode": "Absent",
            "confidenceThreshold": 0.75,
            "region": {"x": 10, "y": 20, "width": 300, "height": 40},
            "language": "eng"
        }))
        .unwrap();

        assert_eq!(condition.source, ConditionSource::Text);
        assert_eq!(condition.mode, ConditionMode::Absent);
        assert_eq!(condition.region.unwrap().width, 300);
        assert_eq!(condition.language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_malformed_condition_is_error() {
        assert!(Condition::from_value(&json!({"source": "Image"})).is_err());
        assert!(Condition::from_value(&json!({"source": "Image", "targetId": "  "})).is_err());
        assert!(Condition::from_value(&json!({
            "source": "Image",
            "targetId": "a",
            "confidenceThreshold": 1.5
        }))
        .is_err());
    }

    #[test]
    fn test_threshold_applies_to_confidence() {
        let condition = Condition::present(ConditionSource::Image, "logo").with_threshold(0.8);

        assert!(condition.is_satisfied_by(&ConditionMeasure::found(0.8)));
        assert!(condition.is_satisfied_by(&ConditionMeasure::found(0.95)));
        assert!(!condition.is_satisfied_by(&ConditionMeasure::found(0.79)));
        assert!(!condition.is_satisfied_by(&ConditionMeasure::missing()));
    }

    #[test]
    fn test_absent_mode_inverts() {
        let condition = Condition::absent(ConditionSource::Text, "Loading").with_threshold(0.5);

        assert!(condition.is_satisfied_by(&ConditionMeasure::missing()));
        assert!(condition.is_satisfied_by(&ConditionMeasure::found(0.2)));
        assert!(!condition.is_satisfied_by(&ConditionMeasure::found(0.9)));
    }

    struct AlwaysFound;

    #[async_trait]
    impl ConditionEvaluator for AlwaysFound {
        async fn measure(
            &self,
            _condition: &Condition,
            _cancel: &CancellationToken,
        ) -> ConditionResult<ConditionMeasure> {
            Ok(ConditionMeasure::found(1.0))
        }
    }

    #[tokio::test]
    async fn test_default_evaluate_uses_mode() {
        let cancel = CancellationToken::new();
        let evaluator = AlwaysFound;

        let present = Condition::present(ConditionSource::Image, "x");
        let absent = Condition::absent(ConditionSource::Image, "x");

        assert!(evaluator.evaluate(&present, &cancel).await.unwrap());
        assert!(!evaluator.evaluate(&absent, &cancel).await.unwrap());
    }
}
