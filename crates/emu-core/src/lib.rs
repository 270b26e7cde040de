//! Core types for emulator automation
//!
//! This crate provides the types shared by the trigger engine, the sequence
//! interpreter and the command executor, plus the boundaries to the outside
//! world those subsystems depend on:
//!
//! - [`ConditionEvaluator`] - computes image/text conditions on a live target
//! - [`SessionHost`] - looks up sessions and delivers input events
//! - [`Repository`] - CRUD storage for triggers, commands, actions, sequences

pub mod action;
pub mod command;
pub mod condition;
pub mod repository;
pub mod session;

pub use action::{Action, InputEvent, KeyAction};
pub use command::{Command, CommandStep, CommandStepType};
pub use condition::{
    Condition, ConditionError, ConditionEvaluator, ConditionMeasure, ConditionMode,
    ConditionResult, ConditionSource, Region,
};
pub use repository::{
    MemoryRepository, Record, Repository, RepositoryError, RepositoryResult, SharedRepository,
};
pub use session::{Session, SessionError, SessionHost, SessionResult, SessionState};

// Re-export the cancellation token so downstream crates agree on one type
pub use tokio_util::sync::CancellationToken;
