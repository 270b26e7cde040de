//! Automation configuration
//!
//! Top-level settings are snake_case; seed definitions use the same
//! camelCase wire shape the repositories hold.

use emu_core::{Action, Command, CommandStepType, Record};
use emu_sequence::Sequence;
use emu_trigger::{PollerConfig, Trigger};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Polling loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_idle_interval_ms: u64,
    pub idle_backoff_factor: u32,
    pub skip_when_no_sessions: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            max_idle_interval_ms: 10_000,
            idle_backoff_factor: 2,
            skip_when_no_sessions: true,
        }
    }
}

impl PollerSettings {
    pub fn to_poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.interval_ms),
            max_idle_interval: Duration::from_millis(self.max_idle_interval_ms),
            idle_backoff_factor: self.idle_backoff_factor,
            skip_when_no_sessions: self.skip_when_no_sessions,
        }
    }
}

/// Full automation configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub poller: PollerSettings,

    /// Session ids reported as running by the dry-run host
    #[serde(default)]
    pub sessions: Vec<String>,

    #[serde(default)]
    pub triggers: Vec<Trigger>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub commands: Vec<Command>,

    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poller: PollerSettings::default(),
            sessions: Vec::new(),
            triggers: Vec::new(),
            actions: Vec::new(),
            commands: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

impl AutomationConfig {
    /// Load, resolve tags, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let value = YamlLoader::new(config_dir).load_file(path)?;

        let config = Self::from_yaml(value, path)?;
        config.validate()?;

        info!(
            path = %path.display(),
            triggers = config.triggers.len(),
            actions = config.actions.len(),
            commands = config.commands.len(),
            sequences = config.sequences.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse an already-processed YAML value
    pub fn from_yaml(value: Value, source: &Path) -> ConfigResult<Self> {
        // An empty file parses as null
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| ConfigError::Schema {
            path: source.to_path_buf(),
            source: e,
        })
    }

    /// Check settings and seed ids
    ///
    /// Dangling references are only logged; they surface as `NotFound`
    /// when the referring command runs.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.poller.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poller.interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        unique_ids("trigger", &self.triggers)?;
        unique_ids("action", &self.actions)?;
        unique_ids("command", &self.commands)?;
        unique_ids("sequence", &self.sequences)?;

        let triggers: HashSet<&str> = self.triggers.iter().map(|t| t.id.as_str()).collect();
        let actions: HashSet<&str> = self.actions.iter().map(|a| a.id.as_str()).collect();
        let commands: HashSet<&str> = self.commands.iter().map(|c| c.id.as_str()).collect();

        for command in &self.commands {
            if let Some(trigger_id) = command.trigger_id.as_deref() {
                if !triggers.contains(trigger_id) {
                    warn!(command_id = %command.id, trigger_id, "Command references unknown trigger");
                }
            }
            for step in &command.steps {
                let known = match step.step_type {
                    CommandStepType::Action => actions.contains(step.target_id.as_str()),
                    CommandStepType::Command => commands.contains(step.target_id.as_str()),
                };
                if !known {
                    warn!(command_id = %command.id, target = %step.target_id, "Command step references unknown target");
                }
            }
        }

        for sequence in &self.sequences {
            for step in &sequence.steps {
                if !commands.contains(step.command_id.as_str()) {
                    warn!(sequence_id = %sequence.id, command_id = %step.command_id, "Sequence step references unknown command");
                }
            }
        }

        Ok(())
    }
}

fn unique_ids<T: Record>(kind: &str, records: &[T]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.record_id()) {
            return Err(ConfigError::ValidationFailed {
                message: format!("duplicate {} id '{}'", kind, record.record_id()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_trigger::TriggerType;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = AutomationConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.poller.enabled);

        let poller = config.poller.to_poller_config();
        assert_eq!(poller.interval, Duration::from_millis(1000));
        assert_eq!(poller.max_idle_interval, Duration::from_millis(10_000));
        assert_eq!(poller.idle_backoff_factor, 2);
        assert!(poller.skip_when_no_sessions);
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "config.yaml", "");

        let config = AutomationConfig::load(&path).unwrap();
        assert!(config.triggers.is_empty());
        assert_eq!(config.poller, PollerSettings::default());
    }

    #[test]
    fn test_load_seeds() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "triggers.yaml",
            r#"
- id: warmup
  type: delay
  params:
    seconds: 5
  cooldownSeconds: 30
"#,
        );
        let path = write_file(
            dir.path(),
            "config.yaml",
            r#"
log_level: debug
poller:
  interval_ms: 250
  skip_when_no_sessions: false
sessions: [emu-1]
triggers: !include triggers.yaml
actions:
  - id: press-a
    inputs:
      - type: key
        key: A
commands:
  - id: jump
    triggerId: warmup
    steps:
      - type: action
        targetId: press-a
        order: 0
sequences:
  - id: combo
    steps:
      - commandId: jump
        order: 0
"#,
        );

        let config = AutomationConfig::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.poller.interval_ms, 250);
        assert_eq!(config.poller.max_idle_interval_ms, 10_000);
        assert!(!config.poller.skip_when_no_sessions);
        assert_eq!(config.sessions, vec!["emu-1"]);

        assert_eq!(config.triggers.len(), 1);
        assert_eq!(config.triggers[0].trigger_type(), TriggerType::Delay);
        assert_eq!(config.triggers[0].cooldown_seconds, 30);
        assert_eq!(config.commands[0].trigger_id.as_deref(), Some("warmup"));
        assert_eq!(config.sequences[0].steps[0].command_id, "jump");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "config.yaml",
            "commands:\n  - id: jump\n    steps: []\n  - id: jump\n    steps: []\n",
        );

        let result = AutomationConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "config.yaml", "poller:\n  interval_ms: 0\n");

        let result = AutomationConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "config.yaml", "poller:\n  interval_ms: soon\n");

        let result = AutomationConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Schema { .. })));
    }
}
