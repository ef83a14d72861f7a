//! Shared worker pool executing submitted task closures.

use std::thread;

use crossbeam::channel::{Sender, unbounded};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads fed by an MPMC injection queue. Submission
/// never blocks; workers exit once the pool is dropped and the queue drains.
/// Abandoned tasks (those still blocked past a block's grace period) are not
/// killed; they finish or park until process exit.
pub struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let size = if threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            threads
        };
        let (sender, receiver) = unbounded::<Job>();
        for id in 0..size {
            let rx = receiver.clone();
            thread::Builder::new()
                .name(format!("lyra-worker-{id}"))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })
                .ok();
        }
        Self { sender, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit(&self, job: Job) {
        // Send only fails if every worker is gone, which means shutdown.
        let _ = self.sender.send(job);
    }
}
