//! Worker threads for a measured job
//!
//! Each worker builds, drives and stops its own trackers and hands them back
//! when it returns. Trackers never cross threads while running.

use crate::stats::StatTracker;
use crate::{Error, Result};
use std::sync::{Arc, Barrier};
use std::thread;

/// Spawns a fixed number of worker threads released together
pub struct ThreadingRuntime {
    num_threads: usize,
}

impl ThreadingRuntime {
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads: num_threads.max(1) }
    }

    /// Run `worker_factory(thread_id)` on every thread and collect the trackers
    ///
    /// All threads wait on a barrier so their first intervals line up. Results
    /// are returned in thread id order. A failed or panicked worker fails the
    /// whole run.
    pub fn run_workers<F>(&self, worker_factory: F) -> Result<Vec<Vec<StatTracker>>>
    where
        F: Fn(usize) -> Result<Vec<StatTracker>> + Send + Sync + Clone + 'static,
    {
        let barrier = Arc::new(Barrier::new(self.num_threads));
        let mut handles = Vec::with_capacity(self.num_threads);

        for thread_id in 0..self.num_threads {
            let worker_factory = worker_factory.clone();
            let barrier = barrier.clone();

            let handle = thread::Builder::new()
                .name(format!("worker-{}", thread_id))
                .spawn(move || {
                    barrier.wait();
                    worker_factory(thread_id)
                })?;
            handles.push(handle);
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let trackers = handle
                .join()
                .map_err(|e| Error::Other(format!("Thread panicked: {:?}", e)))??;
            results.push(trackers);
        }

        Ok(results)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}
