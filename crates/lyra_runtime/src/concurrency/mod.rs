//! Structured concurrency runtime: channels, the worker pool, and
//! parallel/concurrent block state.
//!
//! Concurrency opcodes in the interpreter delegate here. Each task runs in an
//! isolated interpreter instance (own stack, ip, environment chain) that
//! shares this runtime, the registries, and the globals with its parent.

mod block;
mod channel;
mod pool;

pub use block::{
    BlockExecutionState, BlockKind, BlockParams, ErrorStrategy, ExecutionMode, TaskContext,
    TimeoutAction,
};
pub use channel::Channel;
pub use pool::{Job, WorkerPool};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::FastHashMap;

/// Shared scheduler state: one worker pool and the named-channel table.
pub struct ConcurrencyRuntime {
    pool: WorkerPool,
    channels: Mutex<FastHashMap<String, Arc<Channel>>>,
    active_blocks: AtomicUsize,
}

impl ConcurrencyRuntime {
    pub fn new(worker_threads: usize) -> Self {
        Self {
            pool: WorkerPool::new(worker_threads),
            channels: Mutex::new(FastHashMap::default()),
            active_blocks: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Gets or creates the named channel used by `ch=` block parameters.
    pub fn channel_named(&self, name: &str) -> Arc<Channel> {
        self.channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Channel::unbounded()))
            .clone()
    }

    pub fn block_entered(&self) {
        self.active_blocks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn block_exited(&self) {
        self.active_blocks.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_blocks(&self) -> usize {
        self.active_blocks.load(Ordering::SeqCst)
    }
}
