//! Runtime tunables.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Worker threads for parallel/concurrent blocks. 0 = auto-detect.
    pub worker_threads: usize,
    /// Closure tracker sweep interval, in executed instructions.
    /// Must be a power of two.
    pub sweep_every_instrs: u64,
    /// Closure tracker sweep interval, in function returns.
    pub sweep_every_returns: u64,
    /// Poll interval for the block-completion wait loop.
    pub block_poll_interval: Duration,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            sweep_every_instrs: 1024,
            sweep_every_returns: 64,
            block_poll_interval: Duration::from_millis(1),
        }
    }
}
