//! Control block records
//!
//! ```json
//! {
//!   "type": "while",
//!   "condition": {"source": "Image", "targetId": "enemy"},
//!   "breakOn": {"source": "Text", "targetId": "Victory"},
//!   "cadenceMs": 250,
//!   "timeoutMs": 30000,
//!   "maxIterations": 50,
//!   "steps": [{"commandId": "attack", "order": 0}]
//! }
//! ```
//!
//! Items in `steps`/`elseSteps` are nested blocks when they carry a `type`
//! and plain steps otherwise.

use emu_core::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::sequence::{SequenceError, SequenceResult, SequenceStep};

/// Cadence bounds for condition-driven loops
pub const MIN_CADENCE_MS: u64 = 50;
pub const MAX_CADENCE_MS: u64 = 5000;

/// Cadence for condition-driven loops when none is configured
pub const DEFAULT_LOOP_CADENCE_MS: u64 = 250;

/// Iteration cap for condition-driven loops without `maxIterations`
pub const DEFAULT_MAX_ITERATIONS: u32 = 10_000;

/// Block type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    IfElse,
    While,
    RepeatUntil,
    RepeatCount,
}

impl BlockType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::IfElse => "ifElse",
            BlockType::While => "while",
            BlockType::RepeatUntil => "repeatUntil",
            BlockType::RepeatCount => "repeatCount",
        }
    }
}

/// Raw `type` field of a block record, for reporting
pub fn block_type_name(raw: &Value) -> String {
    raw.get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Flat wire shape shared by all block types
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockRecord {
    #[serde(rename = "type")]
    block_type: BlockType,
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    break_on: Option<Value>,
    #[serde(default)]
    continue_on: Option<Value>,
    #[serde(default)]
    cadence_ms: Option<u64>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_iterations: Option<i64>,
    #[serde(default)]
    steps: Vec<Value>,
    #[serde(default)]
    else_steps: Vec<Value>,
}

/// Conditional branch
#[derive(Debug, Clone, PartialEq)]
pub struct IfElseBlock {
    pub condition: Condition,
    pub then_items: Vec<Value>,
    pub else_items: Vec<Value>,
}

/// Shared shape of the three loop blocks
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBlock {
    /// Loop condition (`while`) or exit condition (`repeatUntil`)
    pub condition: Option<Condition>,
    pub break_on: Option<Condition>,
    pub continue_on: Option<Condition>,
    pub cadence: Duration,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<i64>,
    pub items: Vec<Value>,
}

impl LoopBlock {
    /// Iteration cap for condition-driven loops
    pub fn iteration_cap(&self) -> u32 {
        match self.max_iterations {
            Some(n) if n > 0 => n.min(u32::MAX as i64) as u32,
            _ => DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Parsed control block
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    IfElse(IfElseBlock),
    While(LoopBlock),
    RepeatUntil(LoopBlock),
    RepeatCount(LoopBlock),
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::IfElse(_) => BlockType::IfElse,
            Block::While(_) => BlockType::While,
            Block::RepeatUntil(_) => BlockType::RepeatUntil,
            Block::RepeatCount(_) => BlockType::RepeatCount,
        }
    }

    /// Parse a raw block record
    ///
    /// Every malformed piece (unknown type, bad condition, missing required
    /// condition) is reported as [`SequenceError::InvalidBlock`].
    pub fn from_value(raw: &Value) -> SequenceResult<Self> {
        let record: BlockRecord = serde_json::from_value(raw.clone())
            .map_err(|e| SequenceError::InvalidBlock(e.to_string()))?;
        let name = record.block_type.as_str();

        let condition = parse_condition(record.condition.as_ref(), name, "condition")?;
        let break_on = parse_condition(record.break_on.as_ref(), name, "breakOn")?;
        let continue_on = parse_condition(record.continue_on.as_ref(), name, "continueOn")?;

        let require = |c: Option<Condition>| {
            c.ok_or_else(|| SequenceError::InvalidBlock(format!("{} block requires a condition", name)))
        };

        Ok(match record.block_type {
            BlockType::IfElse => Block::IfElse(IfElseBlock {
                condition: require(condition)?,
                then_items: record.steps,
                else_items: record.else_steps,
            }),
            BlockType::While | BlockType::RepeatUntil => {
                let cadence = record
                    .cadence_ms
                    .unwrap_or(DEFAULT_LOOP_CADENCE_MS)
                    .clamp(MIN_CADENCE_MS, MAX_CADENCE_MS);
                let block = LoopBlock {
                    condition: Some(require(condition)?),
                    break_on,
                    continue_on,
                    cadence: Duration::from_millis(cadence),
                    timeout: record.timeout_ms.map(Duration::from_millis),
                    max_iterations: record.max_iterations,
                    items: record.steps,
                };
                if record.block_type == BlockType::While {
                    Block::While(block)
                } else {
                    Block::RepeatUntil(block)
                }
            }
            BlockType::RepeatCount => Block::RepeatCount(LoopBlock {
                condition,
                break_on,
                continue_on,
                cadence: Duration::from_millis(record.cadence_ms.unwrap_or(0)),
                timeout: record.timeout_ms.map(Duration::from_millis),
                max_iterations: record.max_iterations,
                items: record.steps,
            }),
        })
    }
}

fn parse_condition(raw: Option<&Value>, block: &str, field: &str) -> SequenceResult<Option<Condition>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Condition::from_value(value)
            .map(Some)
            .map_err(|e| SequenceError::InvalidBlock(format!("{}.{}: {}", block, field, e))),
    }
}

/// One entry of a block body
#[derive(Debug, Clone, PartialEq)]
pub enum BlockItem<'a> {
    Step(SequenceStep),
    Block(&'a Value),
}

impl<'a> BlockItem<'a> {
    /// Classify a raw body entry
    pub fn from_value(raw: &'a Value) -> SequenceResult<Self> {
        if raw.get("type").is_some() {
            return Ok(BlockItem::Block(raw));
        }
        serde_json::from_value(raw.clone())
            .map(BlockItem::Step)
            .map_err(|e| SequenceError::InvalidStep(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_while_cadence_is_clamped() {
        let block = Block::from_value(&json!({
            "type": "while",
            "condition": {"source": "Image", "targetId": "enemy"},
            "cadenceMs": 10
        }))
        .unwrap();
        let Block::While(lp) = block else {
            panic!("Expected While block");
        };
        assert_eq!(lp.cadence, Duration::from_millis(MIN_CADENCE_MS));

        let block = Block::from_value(&json!({
            "type": "repeatUntil",
            "condition": {"source": "Image", "targetId": "enemy"},
            "cadenceMs": 60000
        }))
        .unwrap();
        let Block::RepeatUntil(lp) = block else {
            panic!("Expected RepeatUntil block");
        };
        assert_eq!(lp.cadence, Duration::from_millis(MAX_CADENCE_MS));
    }

    #[test]
    fn test_repeat_count_cadence_unclamped() {
        let block = Block::from_value(&json!({"type": "repeatCount", "maxIterations": 3}))
            .unwrap();
        let Block::RepeatCount(lp) = block else {
            panic!("Expected RepeatCount block");
        };
        assert_eq!(lp.cadence, Duration::ZERO);
        assert_eq!(lp.max_iterations, Some(3));
    }

    #[test]
    fn test_malformed_blocks() {
        let cases = [
            json!({"type": "forEver"}),
            json!({"steps": []}),
            json!({"type": "ifElse"}),
            json!({"type": "while", "condition": {"targetId": "x"}}),
            json!({"type": "repeatCount", "breakOn": {"source": "Image", "targetId": ""}}),
        ];
        for raw in cases {
            assert!(
                matches!(Block::from_value(&raw), Err(SequenceError::InvalidBlock(_))),
                "expected invalid block for {}",
                raw
            );
        }
    }

    #[test]
    fn test_iteration_cap() {
        let block = |max: Option<i64>| LoopBlock {
            condition: None,
            break_on: None,
            continue_on: None,
            cadence: Duration::ZERO,
            timeout: None,
            max_iterations: max,
            items: Vec::new(),
        };
        assert_eq!(block(Some(5)).iteration_cap(), 5);
        assert_eq!(block(Some(0)).iteration_cap(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(block(None).iteration_cap(), DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn test_block_item_classification() {
        let step = json!({"commandId": "a", "order": 1});
        let block = json!({"type": "repeatCount"});
        let bad = json!({"order": 1});

        assert!(matches!(BlockItem::from_value(&step), Ok(BlockItem::Step(_))));
        assert!(matches!(BlockItem::from_value(&block), Ok(BlockItem::Block(_))));
        assert!(matches!(
            BlockItem::from_value(&bad),
            Err(SequenceError::InvalidStep(_))
        ));
    }

    #[test]
    fn test_type_name_for_reporting() {
        assert_eq!(block_type_name(&json!({"type": "while"})), "while");
        assert_eq!(block_type_name(&json!({})), "unknown");
    }
}
