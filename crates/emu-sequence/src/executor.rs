//! Sequence executor
//!
//! Runs a sequence's steps in order, then its blocks. Blocks are interpreted
//! recursively: a block body holds plain steps and nested blocks, and both go
//! through the same dispatch.
//!
//! Cancellation is checked at every loop head and around every sleep and is
//! always returned as [`SequenceError::Cancelled`] rather than folded into a
//! result.

use async_trait::async_trait;
use chrono::Utc;
use emu_core::{CancellationToken, Condition, ConditionEvaluator, SharedRepository};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::block::{block_type_name, Block, BlockItem, IfElseBlock, LoopBlock};
use crate::result::{
    BlockResult, BlockStatus, Branch, SequenceExecutionResult, SequenceStatus, StepResult,
    StepStatus,
};
use crate::sequence::{Sequence, SequenceError, SequenceResult, SequenceStep};

/// How often a step gate is re-checked
pub const GATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one command on behalf of a step
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command_id: &str, cancel: &CancellationToken) -> SequenceResult<()>;
}

/// Decides whether a gated step may run yet
#[async_trait]
pub trait GateEvaluator: Send + Sync {
    async fn evaluate(&self, step: &SequenceStep, cancel: &CancellationToken) -> SequenceResult<bool>;
}

/// Collaborators for one run
#[derive(Clone, Copy)]
pub struct ExecutionHooks<'a> {
    pub commands: &'a dyn CommandRunner,

    /// Gate decisions; falls back to `conditions` on the step's gate
    pub gates: Option<&'a dyn GateEvaluator>,

    /// Block conditions (and step gates without a gate evaluator)
    pub conditions: Option<&'a dyn ConditionEvaluator>,
}

impl<'a> ExecutionHooks<'a> {
    pub fn new(commands: &'a dyn CommandRunner) -> Self {
        Self {
            commands,
            gates: None,
            conditions: None,
        }
    }

    pub fn with_gates(mut self, gates: &'a dyn GateEvaluator) -> Self {
        self.gates = Some(gates);
        self
    }

    pub fn with_conditions(mut self, conditions: &'a dyn ConditionEvaluator) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

/// Mutable state of one run
struct Run<'h> {
    hooks: ExecutionHooks<'h>,
    cancel: CancellationToken,
    steps: Vec<StepResult>,
    blocks: Vec<BlockResult>,
}

/// Per-block bookkeeping reported in [`BlockResult`]
#[derive(Debug, Default)]
struct BlockCounters {
    iterations: u32,
    conditions_evaluated: u32,
    branch: Option<Branch>,
}

enum Flow {
    Completed,
    Break,
}

/// Sequence interpreter
pub struct SequenceRunner {
    sequences: SharedRepository<Sequence>,
    gate_poll_interval: Duration,
}

impl SequenceRunner {
    pub fn new(sequences: SharedRepository<Sequence>) -> Self {
        Self {
            sequences,
            gate_poll_interval: GATE_POLL_INTERVAL,
        }
    }

    pub fn with_gate_poll_interval(mut self, interval: Duration) -> Self {
        self.gate_poll_interval = interval;
        self
    }

    /// Load and run a stored sequence
    ///
    /// A missing sequence is a [`SequenceStatus::NotFound`] result, not an error.
    pub async fn execute(
        &self,
        sequence_id: &str,
        hooks: ExecutionHooks<'_>,
        cancel: &CancellationToken,
    ) -> SequenceResult<SequenceExecutionResult> {
        let Some(sequence) = self.sequences.get(sequence_id).await? else {
            warn!(sequence_id, "Sequence not found");
            return Ok(SequenceExecutionResult::not_found(sequence_id));
        };
        self.run_sequence(&sequence, hooks, cancel).await
    }

    /// Run a sequence definition
    pub async fn run_sequence(
        &self,
        sequence: &Sequence,
        hooks: ExecutionHooks<'_>,
        cancel: &CancellationToken,
    ) -> SequenceResult<SequenceExecutionResult> {
        let started_at = Utc::now();
        info!(
            sequence_id = %sequence.id,
            steps = sequence.steps.len(),
            blocks = sequence.blocks.len(),
            "Executing sequence"
        );

        let mut run = Run {
            hooks,
            cancel: cancel.clone(),
            steps: Vec::new(),
            blocks: Vec::new(),
        };
        let mut status = SequenceStatus::Succeeded;
        let mut error = None;

        for step in sequence.ordered_steps() {
            let outcome = self.run_step(step, &run).await?;
            let failed = outcome.is_failed();
            if failed {
                error = outcome.error.clone();
            }
            run.steps.push(outcome);
            if failed {
                status = SequenceStatus::Failed;
                break;
            }
        }

        if status == SequenceStatus::Succeeded {
            for raw in &sequence.blocks {
                check_cancel(&run.cancel)?;
                let block_status = self.run_block(raw, &mut run).await?;
                if block_status == BlockStatus::Failed && status != SequenceStatus::Failed {
                    status = SequenceStatus::Failed;
                    error = run.blocks.last().and_then(|b| b.error.clone());
                }
            }
        }

        info!(sequence_id = %sequence.id, status = ?status, "Sequence finished");

        Ok(SequenceExecutionResult {
            sequence_id: sequence.id.clone(),
            status,
            started_at,
            completed_at: Utc::now(),
            error,
            steps: run.steps,
            blocks: run.blocks,
        })
    }

    /// Delay, gate, then run the step's command
    ///
    /// Gate timeouts and command failures become a failed [`StepResult`].
    async fn run_step(&self, step: &SequenceStep, run: &Run<'_>) -> SequenceResult<StepResult> {
        check_cancel(&run.cancel)?;

        let delay = step.delay();
        if !delay.is_zero() {
            trace!(command_id = %step.command_id, delay_ms = delay.as_millis() as u64, "Step delay");
            pause(delay, &run.cancel).await?;
        }

        let mut result = StepResult {
            command_id: step.command_id.clone(),
            order: step.order,
            status: StepStatus::Succeeded,
            delay_ms: delay.as_millis() as u64,
            error: None,
        };

        if let Some(gate) = &step.gate {
            match self.wait_for_gate(step, gate, run).await {
                Ok(()) => {}
                Err(SequenceError::Cancelled) => return Err(SequenceError::Cancelled),
                Err(e) => {
                    warn!(command_id = %step.command_id, error = %e, "Step gate failed");
                    result.status = StepStatus::Failed;
                    result.error = Some(e.to_string());
                    return Ok(result);
                }
            }
        }

        debug!(command_id = %step.command_id, "Executing step");
        match run.hooks.commands.execute(&step.command_id, &run.cancel).await {
            Ok(()) => {}
            Err(SequenceError::Cancelled) => return Err(SequenceError::Cancelled),
            Err(e) => {
                warn!(command_id = %step.command_id, error = %e, "Step command failed");
                result.status = StepStatus::Failed;
                result.error = Some(e.to_string());
            }
        }

        Ok(result)
    }

    async fn wait_for_gate(
        &self,
        step: &SequenceStep,
        gate: &Condition,
        run: &Run<'_>,
    ) -> SequenceResult<()> {
        let deadline = step
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        loop {
            check_cancel(&run.cancel)?;

            let open = match (run.hooks.gates, run.hooks.conditions) {
                (Some(gates), _) => gates.evaluate(step, &run.cancel).await?,
                (None, Some(conditions)) => conditions.evaluate(gate, &run.cancel).await?,
                (None, None) => {
                    warn!(command_id = %step.command_id, "No gate evaluator, treating gate as open");
                    true
                }
            };
            if open {
                return Ok(());
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SequenceError::GateTimeout);
                    }
                    self.gate_poll_interval.min(deadline - now)
                }
                None => self.gate_poll_interval,
            };
            pause(wait, &run.cancel).await?;
        }
    }

    /// Run one block record and append its result
    fn run_block<'a, 'h>(
        &'a self,
        raw: &'a Value,
        run: &'a mut Run<'h>,
    ) -> BoxFuture<'a, SequenceResult<BlockStatus>> {
        Box::pin(async move {
            let started = Instant::now();
            let block_type = block_type_name(raw);
            let mut counters = BlockCounters::default();

            let outcome = match Block::from_value(raw) {
                Ok(block) => self.dispatch(&block, run, &mut counters).await,
                Err(e) => Err(e),
            };

            let (status, error) = match outcome {
                Ok(status) => (status, None),
                Err(SequenceError::Cancelled) => return Err(SequenceError::Cancelled),
                Err(e) => {
                    warn!(block_type = %block_type, error = %e, "Block failed");
                    (BlockStatus::Failed, Some(e.to_string()))
                }
            };

            debug!(
                block_type = %block_type,
                status = ?status,
                iterations = counters.iterations,
                "Block finished"
            );

            run.blocks.push(BlockResult {
                block_type,
                iterations: counters.iterations,
                conditions_evaluated: counters.conditions_evaluated,
                duration_ms: started.elapsed().as_millis() as u64,
                status,
                branch: counters.branch,
                error,
            });
            Ok(status)
        })
    }

    async fn dispatch(
        &self,
        block: &Block,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<BlockStatus> {
        match block {
            Block::IfElse(b) => self.run_if_else(b, run, counters).await,
            Block::While(b) => self.run_while(b, run, counters).await,
            Block::RepeatUntil(b) => self.run_repeat_until(b, run, counters).await,
            Block::RepeatCount(b) => self.run_repeat_count(b, run, counters).await,
        }
    }

    async fn run_if_else(
        &self,
        block: &IfElseBlock,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<BlockStatus> {
        let satisfied = self.check(&block.condition, run, counters).await?;
        let (branch, items) = if satisfied {
            (Branch::Then, &block.then_items)
        } else {
            (Branch::Else, &block.else_items)
        };
        counters.branch = Some(branch);
        counters.iterations = 1;

        self.run_body(items, None, None, run, counters).await?;
        Ok(BlockStatus::Succeeded)
    }

    async fn run_while(
        &self,
        block: &LoopBlock,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<BlockStatus> {
        let condition = required_condition(block, "while")?;
        let started = Instant::now();

        loop {
            check_cancel(&run.cancel)?;

            if let Some(break_on) = &block.break_on {
                if self.check(break_on, run, counters).await? {
                    return Ok(BlockStatus::Succeeded);
                }
            }
            if !self.check(condition, run, counters).await? {
                return Ok(BlockStatus::Succeeded);
            }

            counters.iterations += 1;
            if let Flow::Break = self.run_loop_body(block, run, counters).await? {
                return Ok(BlockStatus::Succeeded);
            }

            check_safeguards(block, started, counters)?;
            pause(block.cadence, &run.cancel).await?;
        }
    }

    /// Exit condition is checked before each iteration; the reported count
    /// excludes the iteration whose check ended the loop.
    async fn run_repeat_until(
        &self,
        block: &LoopBlock,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<BlockStatus> {
        let condition = required_condition(block, "repeatUntil")?;
        let started = Instant::now();

        loop {
            check_cancel(&run.cancel)?;
            counters.iterations += 1;

            if let Some(break_on) = &block.break_on {
                if self.check(break_on, run, counters).await? {
                    counters.iterations -= 1;
                    return Ok(BlockStatus::Succeeded);
                }
            }
            if self.check(condition, run, counters).await? {
                counters.iterations -= 1;
                return Ok(BlockStatus::Succeeded);
            }

            if let Flow::Break = self.run_loop_body(block, run, counters).await? {
                return Ok(BlockStatus::Succeeded);
            }

            check_safeguards(block, started, counters)?;
            pause(block.cadence, &run.cancel).await?;
        }
    }

    /// `break_on` is checked before each iteration and after each item
    async fn run_repeat_count(
        &self,
        block: &LoopBlock,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<BlockStatus> {
        let count = match block.max_iterations {
            Some(n) if n > 0 => n,
            _ => return Ok(BlockStatus::Skipped),
        };

        for i in 0..count {
            check_cancel(&run.cancel)?;
            if i > 0 {
                pause(block.cadence, &run.cancel).await?;
            }

            // also consulted here so an empty body can still break
            if let Some(break_on) = &block.break_on {
                if self.check(break_on, run, counters).await? {
                    break;
                }
            }

            counters.iterations += 1;
            if let Flow::Break = self.run_loop_body(block, run, counters).await? {
                break;
            }
        }
        Ok(BlockStatus::Succeeded)
    }

    async fn run_loop_body(
        &self,
        block: &LoopBlock,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<Flow> {
        self.run_body(
            &block.items,
            block.break_on.as_ref(),
            block.continue_on.as_ref(),
            run,
            counters,
        )
        .await
    }

    /// Run body items, checking `break_on` then `continue_on` after each
    async fn run_body(
        &self,
        items: &[Value],
        break_on: Option<&Condition>,
        continue_on: Option<&Condition>,
        run: &mut Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<Flow> {
        for raw in items {
            self.run_item(raw, run).await?;

            if let Some(condition) = break_on {
                if self.check(condition, run, counters).await? {
                    trace!("Break condition met");
                    return Ok(Flow::Break);
                }
            }
            if let Some(condition) = continue_on {
                if self.check(condition, run, counters).await? {
                    trace!("Continue condition met");
                    break;
                }
            }
        }
        Ok(Flow::Completed)
    }

    async fn run_item(&self, raw: &Value, run: &mut Run<'_>) -> SequenceResult<()> {
        check_cancel(&run.cancel)?;

        match BlockItem::from_value(raw)? {
            BlockItem::Step(step) => {
                let outcome = self.run_step(&step, run).await?;
                let failure = outcome.error.clone().filter(|_| outcome.is_failed());
                run.steps.push(outcome);
                match failure {
                    Some(message) => Err(SequenceError::StepFailed(message)),
                    None => Ok(()),
                }
            }
            BlockItem::Block(nested) => match self.run_block(nested, run).await? {
                BlockStatus::Failed => Err(SequenceError::NestedBlockFailed(block_type_name(nested))),
                _ => Ok(()),
            },
        }
    }

    async fn check(
        &self,
        condition: &Condition,
        run: &Run<'_>,
        counters: &mut BlockCounters,
    ) -> SequenceResult<bool> {
        let evaluator = run
            .hooks
            .conditions
            .ok_or(SequenceError::MissingConditionEvaluator)?;

        counters.conditions_evaluated += 1;
        let satisfied = evaluator.evaluate(condition, &run.cancel).await?;
        trace!(target_id = %condition.target_id, satisfied, "Condition checked");
        Ok(satisfied)
    }
}

fn required_condition<'b>(block: &'b LoopBlock, name: &str) -> SequenceResult<&'b Condition> {
    block
        .condition
        .as_ref()
        .ok_or_else(|| SequenceError::InvalidBlock(format!("{} block requires a condition", name)))
}

/// Iteration cap first, then timeout
fn check_safeguards(
    block: &LoopBlock,
    started: Instant,
    counters: &BlockCounters,
) -> SequenceResult<()> {
    let cap = block.iteration_cap();
    if counters.iterations >= cap {
        return Err(SequenceError::MaxIterations(cap));
    }
    if block.timeout.is_some_and(|t| started.elapsed() >= t) {
        return Err(SequenceError::Timeout);
    }
    Ok(())
}

fn check_cancel(cancel: &CancellationToken) -> SequenceResult<()> {
    if cancel.is_cancelled() {
        return Err(SequenceError::Cancelled);
    }
    Ok(())
}

/// Cancelable sleep
async fn pause(duration: Duration, cancel: &CancellationToken) -> SequenceResult<()> {
    if duration.is_zero() {
        return check_cancel(cancel);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(SequenceError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
