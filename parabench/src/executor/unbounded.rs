use std::sync::Arc;

use tokio::{task::JoinSet, time::Instant};

use super::{Executor, RunOutcome, Tally};
use crate::error::{HarnessError, TaskError};

/// One tokio task per request, with no cap on how many are outstanding.
#[derive(Debug, Clone, Default)]
pub struct UnboundedExecutor;

impl UnboundedExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for UnboundedExecutor {
    async fn run<F>(&self, task_count: usize, task: F) -> Result<RunOutcome, HarnessError>
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let mut tasks = JoinSet::new();

        let start = Instant::now();
        for _ in 0..task_count {
            let task = Arc::clone(&task);
            tasks.spawn(async move { task() });
        }

        let mut tally = Tally::default();
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(TaskError::from_panic(&*e.into_panic())),
                Err(e) => Err(TaskError::Failed(e.to_string())),
            };
            tally.observe(result);
        }
        Ok(tally.finish(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn many_outstanding_tasks_share_few_threads() {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let task = {
            let threads = Arc::clone(&threads);
            let in_flight = Arc::clone(&in_flight);
            move || {
                in_flight.fetch_add(1, Ordering::Relaxed);
                threads.lock().unwrap().insert(std::thread::current().id());
                Ok(())
            }
        };
        let outcome = UnboundedExecutor::new().run(100_000, task).await.unwrap();
        assert_eq!(outcome.succeeded, 100_000);
        assert_eq!(in_flight.load(Ordering::Relaxed), 100_000);
        // The runtime has two workers; the test thread may also poll tasks.
        assert!(threads.lock().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn elapsed_covers_the_slowest_task() {
        let task = || {
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        };
        let outcome = UnboundedExecutor::new().run(3, task).await.unwrap();
        assert!(outcome.elapsed >= Duration::from_millis(20));
        assert_eq!(outcome.total(), 3);
    }
}
