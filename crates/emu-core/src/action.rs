//! Action and input types
//!
//! An action is a named, reusable list of input events that can be sent to a
//! session in one dispatch.

use serde::{Deserialize, Serialize};

use crate::repository::Record;

/// Key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum KeyAction {
    /// Press and release
    #[default]
    Press,
    Down,
    Up,
}

/// A single input event sent to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputEvent {
    /// Hardware/controller key
    #[serde(rename_all = "camelCase")]
    Key {
        key: String,
        #[serde(default)]
        action: KeyAction,
    },

    /// Touch at a point
    Tap { x: i32, y: i32 },

    /// Drag from one point to another
    #[serde(rename_all = "camelCase")]
    Swipe {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
        #[serde(default)]
        duration_ms: u64,
    },

    /// Literal text entry
    Text { text: String },

    /// Pause inside the input stream
    #[serde(rename_all = "camelCase")]
    Wait { duration_ms: u64 },
}

impl InputEvent {
    /// Key press shorthand
    pub fn key(key: impl Into<String>) -> Self {
        InputEvent::Key {
            key: key.into(),
            action: KeyAction::Press,
        }
    }

    /// Tap shorthand
    pub fn tap(x: i32, y: i32) -> Self {
        InputEvent::Tap { x, y }
    }
}

/// Stored action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Input events dispatched in order
    #[serde(default)]
    pub inputs: Vec<InputEvent>,
}

impl Action {
    /// Create an action with the given inputs
    pub fn new(id: impl Into<String>, inputs: Vec<InputEvent>) -> Self {
        Self {
            id: id.into(),
            name: None,
            inputs,
        }
    }

    /// Get display name (name or ID)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether there is anything to dispatch
    pub fn has_inputs(&self) -> bool {
        !self.inputs.is_empty()
    }
}

impl Record for Action {
    fn record_id(&self) -> &str {
        &self.id
    }
}
