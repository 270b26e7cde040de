//! Sequence Interpreter
//!
//! Sequences run a list of command steps, then a list of control blocks:
//!
//! - `ifElse` - evaluate a condition once and run one branch
//! - `while` - loop while a condition holds
//! - `repeatUntil` - loop until a condition holds (checked before each pass)
//! - `repeatCount` - loop a fixed number of times
//!
//! Loop blocks support `breakOn`/`continueOn` conditions checked after every
//! body item, plus iteration and time safeguards.

pub mod block;
pub mod executor;
pub mod result;
pub mod sequence;

pub use block::{Block, BlockItem, BlockType, IfElseBlock, LoopBlock};
pub use executor::{CommandRunner, ExecutionHooks, GateEvaluator, SequenceRunner, GATE_POLL_INTERVAL};
pub use result::{
    BlockResult, BlockStatus, Branch, SequenceExecutionResult, SequenceStatus, StepResult,
    StepStatus,
};
pub use sequence::{DelayRange, Sequence, SequenceError, SequenceResult, SequenceStep};
