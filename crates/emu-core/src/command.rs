//! Command definitions
//!
//! A command is an ordered list of steps, each either an action dispatch or a
//! call into another command. Commands therefore form a directed graph;
//! cycles are rejected at execution time, not when a command is stored.

use serde::{Deserialize, Serialize};

use crate::repository::Record;

/// What a command step points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandStepType {
    #[serde(alias = "action")]
    Action,
    #[serde(alias = "command")]
    Command,
}

/// A single step of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStep {
    /// Action or nested command
    #[serde(rename = "type")]
    pub step_type: CommandStepType,

    /// Action ID or command ID
    pub target_id: String,

    /// Position within the command
    #[serde(default)]
    pub order: i32,
}

impl CommandStep {
    /// Step that dispatches an action
    pub fn action(target_id: impl Into<String>, order: i32) -> Self {
        Self {
            step_type: CommandStepType::Action,
            target_id: target_id.into(),
            order,
        }
    }

    /// Step that runs another command
    pub fn command(target_id: impl Into<String>, order: i32) -> Self {
        Self {
            step_type: CommandStepType::Command,
            target_id: target_id.into(),
            order,
        }
    }
}

/// Stored command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Trigger that gates execution, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,

    /// Steps, executed in ascending `order`
    #[serde(default)]
    pub steps: Vec<CommandStep>,
}

impl Command {
    /// Create a command with the given steps
    pub fn new(id: impl Into<String>, steps: Vec<CommandStep>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger_id: None,
            steps,
        }
    }

    /// Attach a trigger
    pub fn with_trigger(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = Some(trigger_id.into());
        self
    }

    /// Steps sorted by `order`; ties keep their stored position
    pub fn ordered_steps(&self) -> Vec<&CommandStep> {
        let mut steps: Vec<&CommandStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

impl Record for Command {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_deserialize() {
        let command: Command = serde_json::from_value(json!({
            "id": "login",
            "name": "Log in",
            "triggerId": "title-visible",
            "steps": [
                {"type": "Command", "targetId": "dismiss", "order": 2},
                {"type": "action", "targetId": "press-start", "order": 1}
            ]
        }))
        .unwrap();

        assert_eq!(command.trigger_id.as_deref(), Some("title-visible"));
        let ordered = command.ordered_steps();
        assert_eq!(ordered[0].target_id, "press-start");
        assert_eq!(ordered[0].step_type, CommandStepType::Action);
        assert_eq!(ordered[1].step_type, CommandStepType::Command);
    }

    #[test]
    fn test_ordered_steps_is_stable() {
        let command = Command::new(
            "c",
            vec![
                CommandStep::action("first", 0),
                CommandStep::action("second", 0),
                CommandStep::action("zero", -1),
            ],
        );

        let ids: Vec<&str> = command
            .ordered_steps()
            .iter()
            .map(|s| s.target_id.as_str())
            .collect();
        assert_eq!(ids, vec!["zero", "first", "second"]);
    }
}
