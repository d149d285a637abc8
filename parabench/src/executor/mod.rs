//! Executors: the two task-execution models under comparison
//!
//! An [`Executor`] takes a task count and a task function, runs that many
//! independent invocations, and resolves once every one of them has finished.
//! The returned [`RunOutcome::elapsed`] brackets exactly the submit-through-
//! completion window: anything an executor needs to set up (threads, queues)
//! happens before its clock starts.
//!
//! Two implementations exist:
//!
//! - [`BoundedExecutor`]: a fixed set of `P` OS threads pulling job tokens from
//!   a shared channel. Excess tasks queue until a worker frees up, like a
//!   classic fixed-size thread pool.
//! - [`UnboundedExecutor`]: one tokio task per request, no cap. The runtime's
//!   many-to-few scheduler multiplexes them over its worker threads, so
//!   `10^5` outstanding tasks cost memory, not OS threads.
//!
//! [`Strategy`] is the configuration-time choice between the two.
//!
//! # Task failures
//! A task returns `Result<(), TaskError>`. Errors and panics are logged,
//! counted in [`RunOutcome::failed`], and never abort the rest of the batch.
pub mod bounded;
pub mod unbounded;

pub use bounded::BoundedExecutor;
pub use unbounded::UnboundedExecutor;

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{HarnessError, TaskError},
    kernel::Kernel,
};

pub trait Executor
where
    Self: Send + Sync,
{
    /// Run `task_count` invocations of `task` and wait for all of them.
    fn run<F>(
        &self,
        task_count: usize,
        task: F,
    ) -> impl Future<Output = Result<RunOutcome, HarnessError>> + Send
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static;
}

/// What happened during one [`Executor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunOutcome {
    /// Invocations that finished, successfully or not.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Per-worker success/failure counts, merged at the barrier.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

impl Tally {
    pub fn observe(&mut self, result: Result<(), TaskError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(error) => {
                tracing::warn!(%error, "Benchmark task failed");
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: Tally) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }

    pub fn finish(self, elapsed: Duration) -> RunOutcome {
        RunOutcome {
            elapsed,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

/// Invoke a task, turning a panic into a [`TaskError`].
pub(crate) fn guarded<F>(task: &F) -> Result<(), TaskError>
where
    F: Fn() -> Result<(), TaskError>,
{
    catch_unwind(AssertUnwindSafe(task))
        .unwrap_or_else(|payload| Err(TaskError::from_panic(&*payload)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Bounded,
    Unbounded,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Bounded, Strategy::Unbounded];

    /// Kernel each model is traditionally paired with: the legacy pool runs the
    /// scalar loop, the modern task model the chunked one.
    pub fn paired_kernel(self) -> Kernel {
        match self {
            Strategy::Bounded => Kernel::Scalar,
            Strategy::Unbounded => Kernel::Chunked,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Strategy::Bounded => "Bounded",
            Strategy::Unbounded => "Unbounded",
        }
    }

    pub fn executor(self, pool_size: usize) -> StrategyExecutor {
        match self {
            Strategy::Bounded => StrategyExecutor::Bounded(BoundedExecutor::new(pool_size)),
            Strategy::Unbounded => StrategyExecutor::Unbounded(UnboundedExecutor::new()),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An executor selected by [`Strategy`].
#[derive(Debug, Clone)]
pub enum StrategyExecutor {
    Bounded(BoundedExecutor),
    Unbounded(UnboundedExecutor),
}

impl Executor for StrategyExecutor {
    async fn run<F>(&self, task_count: usize, task: F) -> Result<RunOutcome, HarnessError>
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        match self {
            StrategyExecutor::Bounded(executor) => executor.run(task_count, task).await,
            StrategyExecutor::Unbounded(executor) => executor.run(task_count, task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting_task(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> Result<(), TaskError> + Send + Sync + 'static {
        move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_invocation_is_observed_before_run_returns() {
        for strategy in Strategy::ALL {
            for n in [0usize, 1, 1_000, 100_000] {
                let counter = Arc::new(AtomicUsize::new(0));
                let outcome = strategy
                    .executor(100)
                    .run(n, counting_task(Arc::clone(&counter)))
                    .await
                    .unwrap();
                assert_eq!(counter.load(Ordering::Relaxed), n, "{strategy} with {n} tasks");
                assert_eq!(outcome.succeeded, n);
                assert_eq!(outcome.failed, 0);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_tasks_return_immediately() {
        for strategy in Strategy::ALL {
            let outcome = strategy.executor(100).run(0, || Ok(())).await.unwrap();
            assert_eq!(outcome.total(), 0);
            assert!(outcome.elapsed < Duration::from_millis(50));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_and_panics_do_not_abort_the_batch() {
        for strategy in Strategy::ALL {
            let counter = Arc::new(AtomicUsize::new(0));
            let task = {
                let counter = Arc::clone(&counter);
                move || {
                    let i = counter.fetch_add(1, Ordering::Relaxed);
                    match i % 10 {
                        0 => Err(TaskError::Failed(format!("task {i}"))),
                        1 => panic!("task {i} blew up"),
                        _ => Ok(()),
                    }
                }
            };
            let outcome = strategy.executor(8).run(100, task).await.unwrap();
            assert_eq!(counter.load(Ordering::Relaxed), 100);
            assert_eq!(outcome.total(), 100);
            assert_eq!(outcome.failed, 20);
            assert_eq!(outcome.succeeded, 80);
        }
    }

    #[test]
    fn guarded_converts_panics() {
        let err = guarded(&|| -> Result<(), TaskError> { panic!("boom") }).unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "boom"));
        assert!(guarded(&|| Ok::<(), TaskError>(())).is_ok());
    }

    #[test]
    fn strategies_pair_with_kernels() {
        assert_eq!(Strategy::Bounded.paired_kernel(), Kernel::Scalar);
        assert_eq!(Strategy::Unbounded.paired_kernel(), Kernel::Chunked);
        assert_eq!(Strategy::Unbounded.to_string(), "Unbounded");
    }
}
