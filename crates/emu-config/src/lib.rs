//! YAML configuration for the automation service
//!
//! Supported tags:
//!
//! - `!include path` - Include another YAML file
//! - `!env_var NAME [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use emu_config::AutomationConfig;
//!
//! let config = AutomationConfig::load("/etc/emu/automation.yaml")?;
//! let poller = config.poller.to_poller_config();
//! ```

mod config;
mod error;
mod loader;

pub use config::{AutomationConfig, PollerSettings};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};

pub use serde_yaml::Value;
