//! Command Executor
//!
//! Executes command graphs against emulator sessions, either unconditionally
//! or gated on the command's trigger, and adapts that to the sequence
//! interpreter's step runner.

pub mod executor;
pub mod runner;

pub use executor::{
    CommandError, CommandExecutionOutcome, CommandExecutor, CommandResult, NO_TRIGGER,
};
pub use runner::SessionCommandRunner;
