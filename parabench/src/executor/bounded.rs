use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Sender};
use typed_builder::TypedBuilder;

use super::{Executor, RunOutcome, Tally, guarded};
use crate::{
    config::DEFAULT_POOL_SIZE,
    error::{HarnessError, TaskError},
};

/// Fixed-size pool of OS threads; tasks queue while all workers are busy.
///
/// The pool is spawned per run, before the clock starts, with
/// `min(workers, task_count)` threads.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BoundedExecutor {
    #[builder(default = DEFAULT_POOL_SIZE)]
    pub workers: usize,
}

impl BoundedExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Executor for BoundedExecutor {
    async fn run<F>(&self, task_count: usize, task: F) -> Result<RunOutcome, HarnessError>
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let pool = WorkerPool::spawn(self.workers.max(1).min(task_count), Arc::new(task))?;
        tracing::debug!(workers = pool.size(), task_count, "Bounded pool ready");
        // Submitting and joining block, keep them off the async workers.
        let outcome = tokio::task::spawn_blocking(move || pool.execute(task_count)).await?;
        Ok(outcome)
    }
}

struct WorkerPool {
    jobs: Sender<()>,
    handles: Vec<JoinHandle<Tally>>,
}

impl WorkerPool {
    fn spawn<F>(workers: usize, task: Arc<F>) -> Result<Self, HarnessError>
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let (jobs, queue) = channel::unbounded::<()>();
        let handles = (0..workers)
            .map(|id| {
                let queue = queue.clone();
                let task = Arc::clone(&task);
                std::thread::Builder::new()
                    .name(format!("bounded-worker-{id}"))
                    .spawn(move || {
                        let mut tally = Tally::default();
                        // Ends once the sender is dropped and the queue is empty
                        while queue.recv().is_ok() {
                            tally.observe(guarded(&*task));
                        }
                        tally
                    })
                    .map_err(HarnessError::WorkerSpawn)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { jobs, handles })
    }

    fn size(&self) -> usize {
        self.handles.len()
    }

    /// Submits `task_count` jobs and joins every worker.
    fn execute(self, task_count: usize) -> RunOutcome {
        let start = Instant::now();
        for _ in 0..task_count {
            if self.jobs.send(()).is_err() {
                break;
            }
        }
        drop(self.jobs);

        let mut tally = Tally::default();
        for handle in self.handles {
            match handle.join() {
                Ok(worker) => tally.merge(worker),
                Err(_) => tracing::warn!("Bounded worker thread died outside a task"),
            }
        }
        let elapsed: Duration = start.elapsed();
        tally.finish(elapsed)
    }
}
