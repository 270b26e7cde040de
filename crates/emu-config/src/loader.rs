//! YAML loader with custom tag support
//!
//! - `!include path` - Replace the node with another YAML file, resolved
//!   relative to the including file
//! - `!env_var NAME [default]` - Replace the node with an environment
//!   variable, falling back to `default` when it is unset
//!
//! Substituted environment values are read back as YAML scalars so
//! `!env_var POLL_MS 500` can fill a numeric field.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader that resolves `!include` and `!env_var`
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    /// Files currently being loaded, to detect circular includes
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let processed = self.process_value(v, source_path)?;
                    result.insert(k, processed);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<Value>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let include_path = self.value_to_path(&tagged.value, source_path)?;
                debug!(path = %include_path.display(), "Including file");
                self.load_file(&include_path)
            }
            "!env_var" => process_env_var(tagged.value),
            _ => {
                // Unknown tag, keep it but process the inner value
                let processed = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    /// Resolve an include path relative to the including file
    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(path_str) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };

        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        let path = Path::new(path_str);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// `!env_var NAME [default]`
fn process_env_var(value: Value) -> ConfigResult<Value> {
    let Value::String(text) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let text = text.trim();
    let (name, default) = match text.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (text, None),
    };

    let raw = match (std::env::var(name), default) {
        (Ok(v), _) => v,
        (Err(_), Some(default)) => {
            debug!(var = name, "Environment variable unset, using default");
            default.to_string()
        }
        (Err(_), None) => {
            return Err(ConfigError::EnvVarNotFound {
                var: name.to_string(),
            })
        }
    };

    Ok(scalar(raw))
}

/// Read text as a YAML scalar, keeping it a string otherwise
fn scalar(raw: String) -> Value {
    match serde_yaml::from_str::<Value>(&raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(raw),
    }
}

/// Load a YAML file with tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value
            .as_mapping()
            .unwrap()
            .get(&Value::String(key.to_string()))
            .unwrap()
    }

    #[test]
    fn test_nested_include_resolves_relative_to_includer() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "seeds/triggers.yaml", "- id: t1\n  type: delay\n- !include more.yaml\n");
        write_file(dir.path(), "seeds/more.yaml", "id: t2\ntype: delay\n");
        write_file(dir.path(), "config.yaml", "triggers: !include seeds/triggers.yaml\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let triggers = get(&value, "triggers").as_sequence().unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(get(&triggers[1], "id"), &Value::String("t2".to_string()));
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("EMU_CONFIG_TEST_INTERVAL", "1500");
        std::env::remove_var("EMU_CONFIG_TEST_UNSET");
        write_file(
            dir.path(),
            "config.yaml",
            "interval: !env_var EMU_CONFIG_TEST_INTERVAL\nlevel: !env_var EMU_CONFIG_TEST_UNSET debug\nskip: !env_var EMU_CONFIG_TEST_UNSET false\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(&value, "interval").as_u64(), Some(1500));
        assert_eq!(get(&value, "level").as_str(), Some("debug"));
        assert_eq!(get(&value, "skip").as_bool(), Some(false));

        std::env::remove_var("EMU_CONFIG_TEST_INTERVAL");
    }

    #[test]
    fn test_env_var_missing() {
        let dir = TempDir::new().unwrap();
        std::env::remove_var("EMU_CONFIG_TEST_MISSING");
        write_file(dir.path(), "config.yaml", "x: !env_var EMU_CONFIG_TEST_MISSING\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound { .. })));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "include_b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "include_a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_same_file_included_twice_is_not_circular() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "shared.yaml", "ok: true\n");
        write_file(
            dir.path(),
            "config.yaml",
            "first: !include shared.yaml\nsecond: !include shared.yaml\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(get(&value, "second"), "ok").as_bool(), Some(true));
    }

    #[test]
    fn test_missing_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "x: !include nope.yaml\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
