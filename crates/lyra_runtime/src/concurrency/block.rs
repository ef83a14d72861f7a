//! Parallel/concurrent block state and task contexts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::concurrency::Channel;
use crate::core::value::{ErrorValue, Value};
use crate::core::Environment;
use crate::vm::frames::ErrorFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Parallel,
    Concurrent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Batch,
    Stream,
    Async,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    #[default]
    Stop,
    Auto,
    Retry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TimeoutAction {
    #[default]
    Partial,
    Error,
}

/// Parsed `key=value` block parameters.
#[derive(Clone, Debug, Default)]
pub struct BlockParams {
    pub channel: Option<String>,
    pub mode: ExecutionMode,
    /// 0 = auto-detect.
    pub cores: usize,
    pub on_error: ErrorStrategy,
    pub timeout: Duration,
    pub grace: Duration,
    pub on_timeout: TimeoutAction,
}

impl BlockParams {
    /// Parses a comma-separated `key=value` list. Unknown keys are rejected.
    pub fn parse(text: &str) -> Result<BlockParams, String> {
        let mut params = BlockParams {
            grace: Duration::from_millis(500),
            ..Default::default()
        };
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("malformed block parameter '{part}'"))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "ch" | "channel" => params.channel = Some(value.to_string()),
                "mode" => {
                    params.mode = match value {
                        "batch" => ExecutionMode::Batch,
                        "stream" => ExecutionMode::Stream,
                        "async" => ExecutionMode::Async,
                        other => return Err(format!("unknown mode '{other}'")),
                    }
                }
                "cores" => {
                    params.cores = if value == "auto" {
                        0
                    } else {
                        value
                            .parse::<usize>()
                            .map_err(|_| format!("bad cores value '{value}'"))?
                    }
                }
                "on_error" => {
                    params.on_error = match value {
                        "Stop" | "stop" => ErrorStrategy::Stop,
                        "Auto" | "auto" => ErrorStrategy::Auto,
                        "Retry" | "retry" => ErrorStrategy::Retry,
                        other => return Err(format!("unknown on_error strategy '{other}'")),
                    }
                }
                "timeout" => {
                    let ms = value
                        .parse::<u64>()
                        .map_err(|_| format!("bad timeout value '{value}'"))?;
                    params.timeout = Duration::from_millis(ms);
                }
                "grace" => {
                    let ms = value
                        .parse::<u64>()
                        .map_err(|_| format!("bad grace value '{value}'"))?;
                    params.grace = Duration::from_millis(ms);
                }
                "on_timeout" => {
                    params.on_timeout = match value {
                        "partial" => TimeoutAction::Partial,
                        "error" => TimeoutAction::Error,
                        other => return Err(format!("unknown on_timeout action '{other}'")),
                    }
                }
                other => return Err(format!("unknown block parameter '{other}'")),
            }
        }
        Ok(params)
    }
}

/// Per-iteration task state: loop variable binding, environment rooted at a
/// snapshot of the parent chain, and a copy of the parent's error frames so
/// outer handlers still apply inside the task.
pub struct TaskContext {
    pub task_id: usize,
    pub loop_var: String,
    pub iteration_value: Value,
    pub env: Arc<Environment>,
    pub error_frames: Vec<ErrorFrame>,
    pub strategy: ErrorStrategy,
    /// `[start, end)` slice of the shared instruction stream this task runs.
    pub body: (usize, usize),
}

/// State for one parallel/concurrent region, shared between the submitting
/// interpreter and every task it spawns.
pub struct BlockExecutionState {
    pub kind: BlockKind,
    pub params: BlockParams,
    pub output_channel: Option<Arc<Channel>>,
    pub end_ip: usize,

    pub total_tasks: AtomicUsize,
    pub completed_tasks: AtomicUsize,
    pub failed_tasks: AtomicUsize,

    pub start_time: Instant,

    /// (task_id, result) pairs, completion order; sorted by id when drained.
    results: Mutex<Vec<(usize, Value)>>,
    errors: Mutex<Vec<ErrorValue>>,
    has_errors: AtomicBool,

    /// Contexts created by `StoreIterable`, submitted at `EndTask`.
    pending: Mutex<Vec<TaskContext>>,

    /// Free task slots when `cores` bounds the block; unused when 0.
    free_slots: Mutex<usize>,
    slot_cv: Condvar,
}

impl BlockExecutionState {
    pub fn new(kind: BlockKind, params: BlockParams, end_ip: usize) -> Self {
        let cores = params.cores;
        Self {
            kind,
            params,
            output_channel: None,
            end_ip,
            total_tasks: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            start_time: Instant::now(),
            results: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            has_errors: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            free_slots: Mutex::new(cores),
            slot_cv: Condvar::new(),
        }
    }

    /// Blocks the worker until one of the block's `cores` slots is free.
    /// `cores = 0` leaves concurrency bounded only by the pool.
    pub fn acquire_slot(&self) {
        if self.params.cores == 0 {
            return;
        }
        let mut free = self.free_slots.lock();
        while *free == 0 {
            self.slot_cv.wait(&mut free);
        }
        *free -= 1;
    }

    pub fn release_slot(&self) {
        if self.params.cores == 0 {
            return;
        }
        *self.free_slots.lock() += 1;
        self.slot_cv.notify_one();
    }

    pub fn deadline(&self) -> Option<Instant> {
        if self.params.timeout.is_zero() {
            None
        } else {
            Some(self.start_time + self.params.timeout)
        }
    }

    pub fn all_tasks_completed(&self) -> bool {
        self.completed_tasks.load(Ordering::SeqCst) >= self.total_tasks.load(Ordering::SeqCst)
    }

    pub fn add_pending(&self, ctx: TaskContext) {
        self.total_tasks.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(ctx);
    }

    pub fn take_pending(&self) -> Vec<TaskContext> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn add_result(&self, task_id: usize, value: Value) {
        self.results.lock().push((task_id, value));
    }

    /// Results sorted by task id, for a deterministic block result list.
    pub fn drain_results(&self) -> Vec<Value> {
        let mut results = std::mem::take(&mut *self.results.lock());
        results.sort_by_key(|(id, _)| *id);
        results.into_iter().map(|(_, v)| v).collect()
    }

    pub fn add_error(&self, error: ErrorValue) {
        self.has_errors.store(true, Ordering::SeqCst);
        self.errors.lock().push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    pub fn drain_errors(&self) -> Vec<ErrorValue> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Marks a task finished. Failures also count toward completion so the
    /// end-of-block wait terminates.
    pub fn mark_completed(&self, failed: bool) {
        if failed {
            self.failed_tasks.fetch_add(1, Ordering::SeqCst);
        }
        self.completed_tasks.fetch_add(1, Ordering::SeqCst);
    }
}
