//! Trigger coordinator
//!
//! Runs one evaluation pass over the stored triggers and persists each result.

use chrono::{DateTime, Utc};
use emu_core::{CancellationToken, SharedRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::trigger::{Trigger, TriggerError, TriggerResult, TriggerType};
use crate::trigger_eval::TriggerEngine;

/// Selects which triggers a pass evaluates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerFilter {
    /// Restrict to these ids (empty means all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerType>,

    /// Skip disabled triggers entirely instead of recording a disabled result
    #[serde(default)]
    pub enabled_only: bool,
}

impl TriggerFilter {
    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn of_type(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type: Some(trigger_type),
            ..Default::default()
        }
    }

    pub fn matches(&self, trigger: &Trigger) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == &trigger.id) {
            return false;
        }
        if let Some(t) = self.trigger_type {
            if trigger.trigger_type() != t {
                return false;
            }
        }
        !(self.enabled_only && !trigger.enabled)
    }
}

/// Evaluates all stored triggers and writes the outcomes back
pub struct TriggerCoordinator {
    triggers: SharedRepository<Trigger>,
    engine: Arc<TriggerEngine>,

    /// Fixed evaluation time (for testing)
    time_override: Option<DateTime<Utc>>,
}

impl TriggerCoordinator {
    pub fn new(triggers: SharedRepository<Trigger>, engine: Arc<TriggerEngine>) -> Self {
        Self {
            triggers,
            engine,
            time_override: None,
        }
    }

    /// Evaluate every pass at a fixed time
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time_override = Some(time);
        self
    }

    /// Current time (or override if set)
    pub fn now(&self) -> DateTime<Utc> {
        self.time_override.unwrap_or_else(Utc::now)
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    pub fn triggers(&self) -> &SharedRepository<Trigger> {
        &self.triggers
    }

    /// Evaluate all (matching) triggers once and persist each result
    ///
    /// Triggers are evaluated one after another. A failure to persist one
    /// trigger does not stop the pass; the failures are reported together
    /// as [`TriggerError::PersistFailed`] once every trigger was handled.
    /// Returns the number of evaluated triggers.
    pub async fn evaluate_all(
        &self,
        filter: Option<&TriggerFilter>,
        cancel: &CancellationToken,
    ) -> TriggerResult<usize> {
        let triggers = self.triggers.list().await?;

        let mut evaluated = 0;
        let mut failed = Vec::new();
        let mut last_error = None;

        for trigger in triggers {
            if filter.is_some_and(|f| !f.matches(&trigger)) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(TriggerError::Cancelled);
            }

            let now = self.now();
            let evaluation = self.engine.evaluate(&trigger, now, cancel).await?;
            evaluated += 1;

            let id = trigger.id.clone();
            if evaluation.result.is_satisfied() {
                info!(trigger_id = %id, reason = %evaluation.result.reason, "Trigger satisfied");
            }

            let updated = trigger.with_evaluation(&evaluation);
            if let Err(e) = self.triggers.upsert(updated).await {
                error!(trigger_id = %id, error = %e, "Failed to persist trigger evaluation");
                failed.push(id);
                last_error = Some(e.to_string());
            }
        }

        debug!(evaluated, failed = failed.len(), "Trigger pass finished");

        match last_error {
            Some(message) => Err(TriggerError::PersistFailed {
                evaluated,
                failed,
                message,
            }),
            None => Ok(evaluated),
        }
    }

    /// Evaluate a single trigger by id and persist the result
    pub async fn evaluate_one(
        &self,
        trigger_id: &str,
        cancel: &CancellationToken,
    ) -> TriggerResult<Trigger> {
        let trigger = self
            .triggers
            .get(trigger_id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(trigger_id.to_string()))?;

        let evaluation = self.engine.evaluate(&trigger, self.now(), cancel).await?;
        let updated = trigger.with_evaluation(&evaluation);
        self.triggers.upsert(updated.clone()).await?;
        Ok(updated)
    }

    /// Enable a stored trigger
    ///
    /// Re-enabling a disabled trigger clears its baseline so delays and
    /// schedules are measured from the next evaluation.
    pub async fn enable(&self, trigger_id: &str) -> TriggerResult<Trigger> {
        self.update(trigger_id, Trigger::enable).await
    }

    /// Disable a stored trigger
    pub async fn disable(&self, trigger_id: &str) -> TriggerResult<Trigger> {
        self.update(trigger_id, Trigger::disable).await
    }

    async fn update(&self, trigger_id: &str, f: fn(&mut Trigger)) -> TriggerResult<Trigger> {
        let mut trigger = self
            .triggers
            .get(trigger_id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(trigger_id.to_string()))?;
        f(&mut trigger);
        self.triggers.upsert(trigger.clone()).await?;
        Ok(trigger)
    }
}
