// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queues executing background tasks.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::PropagationError;
use crate::tasks::Task;
use crate::traits::{TaskHandler, TaskQueue};

/// Task which failed on every attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedTask {
    pub task: Task,
    pub error: PropagationError,
}

/// Tasks which ran out of attempts. They are kept for inspection and manual replay.
#[derive(Debug, Default)]
struct DeadLetters(Mutex<Vec<FailedTask>>);

impl DeadLetters {
    fn push(&self, failed: FailedTask) {
        error!(task = %failed.task, error = %failed.error, "task moved to dead-letter list");
        self.0
            .lock()
            .expect("acquire dead-letter lock")
            .push(failed);
    }

    fn snapshot(&self) -> Vec<FailedTask> {
        self.0.lock().expect("acquire dead-letter lock").clone()
    }
}

/// Runs every task directly inside of `submit`.
///
/// Failed attempts are retried right away, there is no backoff.
pub struct InlineQueue<H> {
    handler: H,
    max_attempts: u32,
    failed: DeadLetters,
}

impl<H> InlineQueue<H>
where
    H: TaskHandler,
{
    pub fn new(handler: H, max_attempts: u32) -> Self {
        Self {
            handler,
            max_attempts: max_attempts.max(1),
            failed: DeadLetters::default(),
        }
    }

    pub fn failed(&self) -> Vec<FailedTask> {
        self.failed.snapshot()
    }
}

impl<H> TaskQueue for InlineQueue<H>
where
    H: TaskHandler,
{
    fn submit(&self, task: Task) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.handler.handle(&task) {
                Ok(()) => return,
                Err(err) if attempts < self.max_attempts => {
                    warn!(%task, %err, attempts, "task failed, retry");
                }
                Err(err) => {
                    self.failed.push(FailedTask {
                        task,
                        error: err.with_attempts(attempts),
                    });
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    pending: AtomicUsize,
    idle: Notify,
    failed: DeadLetters,
}

impl PoolState {
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed number of tokio tasks consuming one unbounded inbox.
///
/// Every task is attempted up to `max_attempts` times with a jittered backoff in between, or
/// until the retry budget of the backoff is spent. Tasks which still fail end up in the
/// dead-letter list, nothing is dropped silently.
#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Task>,
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn spawn<H>(handler: H, config: &Config) -> Self
    where
        H: TaskHandler,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handler = Arc::new(handler);
        let state = Arc::new(PoolState::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rng = ChaCha20Rng::from_rng(&mut rand::rng());
                tokio::spawn(run_worker(
                    worker,
                    rng,
                    rx.clone(),
                    handler.clone(),
                    state.clone(),
                    config.clone(),
                ))
            })
            .collect();

        Self { tx, state, workers }
    }

    /// Number of submitted tasks which have not finished yet.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Resolves as soon as every submitted task finished, successfully or not.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn failed(&self) -> Vec<FailedTask> {
        self.state.failed.snapshot()
    }

    /// Stop accepting tasks, finish the queued ones and wait for all workers to exit.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(%err, "worker exited abnormally");
            }
        }
    }
}

impl TaskQueue for WorkerPool {
    fn submit(&self, task: Task) {
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            self.state.failed.push(FailedTask {
                error: PropagationError::new(&task, "worker pool is shut down"),
                task,
            });
            self.state.finish();
        }
    }
}

async fn run_worker<H>(
    worker: usize,
    mut rng: ChaCha20Rng,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Task>>>,
    handler: Arc<H>,
    state: Arc<PoolState>,
    config: Config,
) where
    H: TaskHandler,
{
    let max_attempts = config.max_attempts.max(1);

    loop {
        // Only hold the receiver while waiting, other workers pick up tasks meanwhile.
        let next = { rx.lock().await.recv().await };
        let Some(task) = next else {
            break;
        };

        let mut backoff = Backoff::new(config.backoff.clone(), ChaCha20Rng::from_rng(&mut rng));
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match handler.handle(&task) {
                Ok(()) => break,
                Err(err) => err,
            };

            let delay = (attempts < max_attempts)
                .then(|| backoff.next_delay())
                .flatten();
            match delay {
                Some(delay) => {
                    warn!(worker, %task, %err, attempts, ?delay, "task failed, retry");
                    Backoff::sleep(delay).await;
                }
                None => {
                    state.failed.push(FailedTask {
                        task,
                        error: err.with_attempts(attempts),
                    });
                    break;
                }
            }
        }

        state.finish();
    }

    debug!(worker, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use grove_core::{NodeId, Revision};

    use crate::backoff::BackoffConfig;
    use crate::config::Config;
    use crate::error::PropagationError;
    use crate::tasks::Task;
    use crate::traits::{TaskHandler, TaskQueue};

    use super::{InlineQueue, WorkerPool};

    /// Fails the first `failures` calls, succeeds afterwards.
    #[derive(Clone, Default)]
    struct FlakyHandler {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl TaskHandler for FlakyHandler {
        fn handle(&self, task: &Task) -> Result<(), PropagationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PropagationError::new(task, "flaky"))
            } else {
                Ok(())
            }
        }
    }

    fn task(node: u64) -> Task {
        Task::RebuildNodes {
            nodes: vec![NodeId::new(node)],
            revision: Revision::ZERO,
        }
    }

    fn config(max_attempts: u32) -> Config {
        Config {
            workers: 2,
            max_attempts,
            backoff: BackoffConfig::immediate(),
            ..Default::default()
        }
    }

    #[test]
    fn inline_retries() {
        let handler = FlakyHandler {
            failures: 2,
            ..Default::default()
        };
        let queue = InlineQueue::new(handler.clone(), 3);

        queue.submit(task(1));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(queue.failed().is_empty());
    }

    #[test]
    fn inline_dead_letters() {
        let handler = FlakyHandler {
            failures: u32::MAX,
            ..Default::default()
        };
        let queue = InlineQueue::new(handler, 2);

        queue.submit(task(1));
        let failed = queue.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.attempts, 2);
        assert_eq!(failed[0].task, task(1));
    }

    #[tokio::test]
    async fn pool_retries_until_success() {
        crate::test_utils::setup_logging();

        let handler = FlakyHandler {
            failures: 3,
            ..Default::default()
        };
        let pool = WorkerPool::spawn(handler.clone(), &config(5));

        pool.submit(task(1));
        pool.submit(task(2));
        pool.wait_idle().await;

        assert_eq!(pool.pending(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert!(pool.failed().is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_keeps_exhausted_tasks() {
        let handler = FlakyHandler {
            failures: u32::MAX,
            ..Default::default()
        };
        let pool = WorkerPool::spawn(handler.clone(), &config(3));

        for node in 0..4 {
            pool.submit(task(node));
        }
        pool.wait_idle().await;

        let mut failed = pool.failed();
        failed.sort_by_key(|failed| match &failed.task {
            Task::RebuildNodes { nodes, .. } => nodes[0],
            _ => unreachable!(),
        });
        assert_eq!(failed.len(), 4);
        assert!(failed.iter().all(|failed| failed.error.attempts == 3));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 12);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_stops_retrying_after_budget() {
        let handler = FlakyHandler {
            failures: u32::MAX,
            ..Default::default()
        };
        let config = Config {
            backoff: BackoffConfig {
                budget: Some(Duration::ZERO),
                ..BackoffConfig::immediate()
            },
            ..config(10)
        };
        let pool = WorkerPool::spawn(handler.clone(), &config);

        pool.submit(task(1));
        pool.wait_idle().await;

        let failed = pool.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.attempts, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn wait_idle_without_tasks() {
        let pool = WorkerPool::spawn(FlakyHandler::default(), &config(1));
        pool.wait_idle().await;
        pool.shutdown().await;
    }
}
