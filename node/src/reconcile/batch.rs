//! Bounded-parallelism execution under a per-cycle time budget.

use std::future::Future;
use std::time::Instant;

/// Runs independent actions in batches of at most `parallel`, stopping once a
/// deadline passes.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    parallel: usize,
}

impl BatchRunner {
    pub fn new(parallel: usize) -> Self {
        Self {
            parallel: parallel.max(1),
        }
    }

    /// Run `actions`, checking the deadline after each batch.
    ///
    /// At least one batch always runs, so every cycle makes forward progress.
    /// Whatever remains when the deadline passes is returned as a deferred
    /// count; the caller recomputes the work list next cycle instead of
    /// resuming a stale one.
    pub async fn run<T, F>(&self, actions: Vec<F>, deadline: Instant) -> (Vec<T>, usize)
    where
        F: Future<Output = T>,
    {
        let mut outcomes = Vec::with_capacity(actions.len());
        let mut pending = actions.into_iter();
        loop {
            let batch: Vec<F> = pending.by_ref().take(self.parallel).collect();
            if batch.is_empty() {
                break;
            }
            outcomes.extend(futures::future::join_all(batch).await);
            if Instant::now() >= deadline {
                break;
            }
        }
        let deferred = pending.count();
        (outcomes, deferred)
    }
}
