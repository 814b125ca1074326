//! Worker pool for download jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::queue::JobQueue;
use crate::config::DEFAULT_WORKER_COUNT;
use crate::downloader::DownloadWorker;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent downloads.
    pub max_workers: usize,
    /// Fallback poll interval in case a wake-up is missed.
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_WORKER_COUNT,
            poll_interval_ms: 250,
        }
    }
}

/// Decrements the active count when a job episode ends, even if aborted.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fixed set of worker loops pulling job ids from the queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            config: WorkerPoolConfig {
                max_workers,
                ..config
            },
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the worker loops. Calling it again while running is a no-op.
    pub fn start(&self, queue: Arc<JobQueue>, worker: Arc<DownloadWorker>) {
        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };
        if !join_set.is_empty() {
            return;
        }

        info!(
            "Starting download worker pool with {} max workers",
            self.config.max_workers
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        for i in 0..self.config.max_workers {
            let semaphore = self.semaphore.clone();
            let cancellation_token = self.cancellation_token.clone();
            let active_workers = self.active_workers.clone();
            let queue = queue.clone();
            let worker = worker.clone();
            let notifier = queue.notifier();

            join_set.spawn(async move {
                debug!("Download worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    let Some(job_id) = queue.pop() else {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                        continue;
                    };

                    let permit = tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let _active = ActiveGuard::new(active_workers.clone());
                    debug!("Download worker {} picked up job {}", i, job_id);
                    worker.run(&job_id).await;
                    drop(permit);
                }

                debug!("Download worker {} shutting down", i);
            });
        }
    }

    /// Stop the pool, aborting in-flight episodes.
    ///
    /// Aborted jobs stay RUNNING in the repository and are re-queued by the
    /// next start-up recovery.
    pub async fn stop(&self) {
        info!("Stopping download worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
        }

        info!("Download worker pool stopped");
    }

    /// Number of episodes currently executing.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_workers, 2);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: 0,
            poll_interval_ms: 10,
        });
        assert_eq!(pool.max_workers(), 1);
        assert!(pool.is_running());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_active_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _a = ActiveGuard::new(counter.clone());
            let _b = ActiveGuard::new(counter.clone());
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
