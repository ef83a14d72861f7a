//! Parallel/concurrent block opcodes and task execution.
//!
//! `BeginParallel`/`BeginConcurrent` push a `BlockExecutionState`;
//! `BeginTask` records the loop variable; `StoreIterable` materializes the
//! iterable and creates one `TaskContext` per element; `EndTask` submits them
//! to the worker pool; the block's end opcode is the completion barrier:
//! a polling wait with timeout and grace handling, after which the output
//! channel closes and the error policy applies.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use lyra_ir::{Instruction, Op};

use crate::concurrency::{
    BlockExecutionState, BlockKind, BlockParams, ErrorStrategy, ExecutionMode, TaskContext,
    TimeoutAction,
};
use crate::core::value::ErrorValue;
use crate::core::{Environment, Value};
use crate::errors::{VmError, messages};
use crate::vm::{Interp, VmShared};

impl Interp {
    pub(crate) fn op_begin_block(&mut self, kind: BlockKind, params: &str) -> Result<(), VmError> {
        let params = BlockParams::parse(params).map_err(|e| self.fault(e))?;
        let end_ip = self.find_block_end(kind)?;

        let mut state = BlockExecutionState::new(kind, params, end_ip);
        if let Some(name) = state.params.channel.clone() {
            // `ch=` names an in-scope channel variable when one exists,
            // falling back to the runtime's named-channel table.
            let channel = match self.env.get(&name) {
                Some(Value::Channel(channel)) => channel,
                _ => self.shared.concurrency.channel_named(&name),
            };
            state.output_channel = Some(channel);
        }
        tracing::debug!(?kind, end_ip, "block entered");
        self.shared.concurrency.block_entered();
        self.blocks.push(Arc::new(state));
        Ok(())
    }

    pub(crate) fn op_begin_task(&mut self, loop_var: &str) -> Result<(), VmError> {
        if self.blocks.is_empty() {
            return Err(self.fault(messages::TASK_OUTSIDE_BLOCK));
        }
        self.task_loop_var = Some(loop_var.to_string());
        Ok(())
    }

    /// Materializes the iterable into one task per element. The parent
    /// interpreter skips the task body; only task interpreters execute it.
    pub(crate) fn op_store_iterable(&mut self) -> Result<(), VmError> {
        let iterable = self.pop("STORE_ITERABLE")?;
        let block = self
            .blocks
            .last()
            .cloned()
            .ok_or_else(|| self.fault(messages::TASK_OUTSIDE_BLOCK))?;
        let loop_var = self
            .task_loop_var
            .clone()
            .ok_or_else(|| self.fault("STORE_ITERABLE without BEGIN_TASK"))?;

        let end_task = self.find_end_task()?;
        let body = (self.ip, end_task);

        let mut cursor = self.make_cursor(&iterable)?;
        let mut task_id = 0usize;
        while let Some(value) = cursor.next() {
            let env = Environment::child(&self.env);
            env.define(loop_var.clone(), value.clone());
            block.add_pending(TaskContext {
                task_id,
                loop_var: loop_var.clone(),
                iteration_value: value,
                env,
                error_frames: self.error_frames.to_vec(),
                strategy: block.params.on_error,
                body,
            });
            task_id += 1;
        }

        self.ip = end_task;
        Ok(())
    }

    pub(crate) fn op_end_task(&mut self) -> Result<(), VmError> {
        let block = self
            .blocks
            .last()
            .cloned()
            .ok_or_else(|| self.fault(messages::TASK_OUTSIDE_BLOCK))?;
        self.task_loop_var = None;

        for ctx in block.take_pending() {
            let shared = self.shared.clone();
            let code = self.code.clone();
            let globals = self.globals.clone();
            let block = block.clone();
            self.shared.concurrency.pool().submit(Box::new(move || {
                run_task(shared, code, globals, block, ctx);
            }));
        }
        Ok(())
    }

    /// The completion barrier: polls until every task finished or the
    /// timeout (plus grace period) elapsed. Stragglers are abandoned, not
    /// killed, and counted failed.
    pub(crate) fn op_end_block(&mut self, kind: BlockKind) -> Result<(), VmError> {
        let block = self
            .blocks
            .pop()
            .ok_or_else(|| self.fault(messages::END_WITHOUT_BLOCK))?;
        if block.kind != kind {
            self.shared.concurrency.block_exited();
            return Err(self.fault(messages::END_WITHOUT_BLOCK));
        }

        let poll = self.shared.config.block_poll_interval;
        let deadline = block.deadline();
        let mut timed_out = false;

        while !block.all_tasks_completed() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let grace_end = Instant::now() + block.params.grace;
                    while !block.all_tasks_completed() && Instant::now() < grace_end {
                        std::thread::sleep(poll);
                    }
                    if !block.all_tasks_completed() {
                        timed_out = true;
                        let total = block.total_tasks.load(Ordering::SeqCst);
                        let done = block.completed_tasks.load(Ordering::SeqCst);
                        block.failed_tasks.fetch_add(total - done, Ordering::SeqCst);
                        tracing::debug!(total, done, "block timed out, stragglers abandoned");
                    }
                    break;
                }
            }
            std::thread::sleep(poll);
        }

        self.shared.concurrency.block_exited();

        let total = block.total_tasks.load(Ordering::SeqCst);
        let failed = block.failed_tasks.load(Ordering::SeqCst);
        let results = block.drain_results();
        // Stream mode already delivered each result as its task completed;
        // batch and async deliver the settled, ordered list here.
        if let Some(channel) = &block.output_channel {
            if block.params.mode != ExecutionMode::Stream {
                for value in &results {
                    channel.send(value.clone());
                }
            }
            channel.close();
        }
        tracing::debug!(?kind, total, failed, "block drained");

        if timed_out && block.params.on_timeout == TimeoutAction::Error {
            let err = Value::from_error(ErrorValue::new(
                "ParallelExecutionError",
                format!("block timed out with {failed} of {total} tasks unfinished"),
                self.line,
            ));
            return self.propagate(err);
        }
        // Tasks abandoned by a timeout count failed but carry no error;
        // `Stop` fires only on real task errors so `on_timeout=partial`
        // still yields the partial list.
        if block.has_errors() && block.params.on_error == ErrorStrategy::Stop {
            let detail = block
                .drain_errors()
                .first()
                .map(|e| format!("{}: {}", e.error_type, e.message))
                .unwrap_or_else(|| "task failed".to_string());
            let err = Value::from_error(ErrorValue::new(
                "ParallelExecutionError",
                format!("{failed} of {total} tasks failed ({detail})"),
                self.line,
            ));
            return self.propagate(err);
        }

        self.stack.push(Value::list(results));
        Ok(())
    }

    /// Finds the matching end opcode for the block being entered; `self.ip`
    /// already points past the begin opcode.
    fn find_block_end(&self, kind: BlockKind) -> Result<usize, VmError> {
        let (is_begin, is_end): (fn(&Op) -> bool, fn(&Op) -> bool) = match kind {
            BlockKind::Parallel => (
                |op| matches!(op, Op::BeginParallel(_)),
                |op| matches!(op, Op::EndParallel),
            ),
            BlockKind::Concurrent => (
                |op| matches!(op, Op::BeginConcurrent(_)),
                |op| matches!(op, Op::EndConcurrent),
            ),
        };
        self.find_matching(is_begin, is_end)
            .ok_or_else(|| self.fault("block has no matching end"))
    }

    fn find_end_task(&self) -> Result<usize, VmError> {
        self.find_matching(
            |op| matches!(op, Op::BeginTask(_)),
            |op| matches!(op, Op::EndTask),
        )
        .ok_or_else(|| self.fault("task has no matching END_TASK"))
    }

    /// Depth-tracked scan from the current ip for the matching closer.
    fn find_matching(&self, is_open: fn(&Op) -> bool, is_close: fn(&Op) -> bool) -> Option<usize> {
        let mut depth = 1usize;
        for ip in self.ip..self.code.len() {
            let op = &self.code[ip].op;
            if is_open(op) {
                depth += 1;
            } else if is_close(op) {
                depth -= 1;
                if depth == 0 {
                    return Some(ip);
                }
            }
        }
        None
    }
}

/// Executes one task on a worker thread in an isolated interpreter sharing
/// globals, registries, and the scheduler with the parent. Failures are
/// captured as `TaskExecutionError`s in the block state rather than crashing
/// anything; the `Retry` strategy re-runs a failing task a bounded number of
/// times.
fn run_task(
    shared: Arc<VmShared>,
    code: Arc<[Instruction]>,
    globals: Arc<Environment>,
    block: Arc<BlockExecutionState>,
    ctx: TaskContext,
) {
    const RETRY_LIMIT: usize = 3;
    let attempts = if ctx.strategy == ErrorStrategy::Retry {
        RETRY_LIMIT
    } else {
        1
    };

    block.acquire_slot();
    let mut last_error: Option<VmError> = None;
    for attempt in 0..attempts {
        let mut interp = Interp::for_task(
            shared.clone(),
            code.clone(),
            globals.clone(),
            ctx.env.clone(),
            ctx.error_frames.clone(),
            ctx.body,
        );
        match interp.run() {
            Ok(value) => {
                tracing::trace!(task_id = ctx.task_id, attempt, "task completed");
                if block.params.mode == ExecutionMode::Stream {
                    if let Some(channel) = &block.output_channel {
                        channel.send(value.clone());
                    }
                }
                block.add_result(ctx.task_id, value);
                block.mark_completed(false);
                block.release_slot();
                return;
            }
            Err(e) => {
                tracing::trace!(task_id = ctx.task_id, attempt, error = %e, "task failed");
                last_error = Some(e);
            }
        }
    }

    let e = last_error.map(|e| e.to_string()).unwrap_or_default();
    block.add_error(ErrorValue::new("TaskExecutionError", e, 0));
    block.mark_completed(true);
    block.release_slot();
}
