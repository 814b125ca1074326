//! Job scheduler service.
//!
//! Entry point for every job operation: admission, cancel, retry, delete,
//! queries and start-up recovery. Execution is delegated to the worker pool.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::queue::JobQueue;
use super::registry::{CancelOutcome, JobRegistry};
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::database::repositories::JobRepository;
use crate::domain::{Job, JobId, JobState, MediaReference};
use crate::downloader::{DownloadWorker, FetchProvider, WorkerConfig};
use crate::store::AssetStore;
use crate::{Error, Result};

/// Scheduler configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub pool: WorkerPoolConfig,
    pub worker: WorkerConfig,
}

/// Queue depth and executor load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Jobs waiting for a worker.
    pub pending: usize,
    /// Jobs being executed.
    pub processing: usize,
    /// Every job the scheduler knows about.
    pub total: usize,
}

/// What start-up recovery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records loaded from the repository.
    pub restored: usize,
    /// Jobs found RUNNING and reset to PENDING.
    pub interrupted: usize,
    /// Jobs put back on the queue.
    pub requeued: usize,
}

/// Orchestrates the job lifecycle.
pub struct JobScheduler {
    registry: Arc<JobRegistry>,
    repository: Arc<dyn JobRepository>,
    store: Arc<AssetStore>,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
    worker: Arc<DownloadWorker>,
    /// Serializes operations that create, reset or remove jobs.
    admission: Mutex<()>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<JobRegistry>,
        repository: Arc<dyn JobRepository>,
        store: Arc<AssetStore>,
        provider: Arc<dyn FetchProvider>,
    ) -> Self {
        let worker = Arc::new(DownloadWorker::new(
            registry.clone(),
            store.clone(),
            provider,
            config.worker,
        ));
        Self {
            registry,
            repository,
            store,
            queue: Arc::new(JobQueue::new()),
            pool: WorkerPool::new(config.pool),
            worker,
            admission: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Admit a reference.
    ///
    /// - new media: a PENDING job is created and queued
    /// - FAILED or CANCELLED: the job is reset and queued again
    /// - PENDING, RUNNING or COMPLETE: [`Error::Conflict`]
    pub async fn submit(&self, reference: &str) -> Result<Job> {
        let reference = MediaReference::parse(reference)?;
        let id = reference.job_id().clone();
        let _guard = self.admission.lock().await;

        if let Some(existing) = self.registry.get(&id) {
            if existing.state.is_retryable() {
                info!(job_id = %id, previous = %existing.state, "Re-admitting job");
                return self.requeue(&id).await;
            }
            return Err(Error::conflict(format!(
                "job {id} already exists with state {}",
                existing.state
            )));
        }

        let job = self.registry.insert(Job::new(reference)).await?;
        self.queue.push(id.clone());
        info!(job_id = %id, "Job admitted");
        Ok(job)
    }

    /// Cancel a job; returns the state the job is in afterwards.
    ///
    /// A pending job becomes CANCELLED immediately. A running job returns
    /// RUNNING: its worker lands it in CANCELLED at the next checkpoint.
    pub async fn cancel(&self, id: &JobId) -> Result<JobState> {
        let _guard = self.admission.lock().await;
        match self.registry.request_cancel(id).await? {
            CancelOutcome::Cancelled => {
                self.queue.remove(id);
                info!(job_id = %id, "Pending job cancelled");
                Ok(JobState::Cancelled)
            }
            CancelOutcome::Signalled => {
                info!(job_id = %id, "Cancellation requested for running job");
                Ok(JobState::Running)
            }
        }
    }

    /// Reset a FAILED or CANCELLED job and queue it again.
    pub async fn retry(&self, id: &JobId) -> Result<Job> {
        let _guard = self.admission.lock().await;
        self.requeue(id).await
    }

    async fn requeue(&self, id: &JobId) -> Result<Job> {
        let job = self.registry.reset(id).await?;
        self.store.cleanup(id).await;
        self.queue.push(id.clone());
        Ok(job)
    }

    /// Delete a terminal job, its record and every file it produced.
    pub async fn delete(&self, id: &JobId) -> Result<()> {
        let _guard = self.admission.lock().await;
        let job = self.get(id)?;
        if !job.state.is_terminal() {
            return Err(Error::invalid_transition(job.state, "deleted"));
        }
        self.store.cleanup(id).await;
        self.registry.remove(id).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::not_found("Job", id.as_str()))
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.queue.len(),
            processing: self.pool.active_count(),
            total: self.registry.len(),
        }
    }

    /// Rebuild in-memory state from the repository.
    ///
    /// RUNNING records belong to a previous process: their partial files are
    /// removed and they go back to PENDING. PENDING jobs are queued in
    /// creation order. Must run before [`JobScheduler::start`].
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let _guard = self.admission.lock().await;
        let records = self.repository.list_records().await?;
        let mut report = RecoveryReport::default();

        for mut job in records {
            let id = job.id.clone();
            if job.recover_interrupted() {
                report.interrupted += 1;
                self.store.cleanup(&id).await;
                // Entering pending clears the stored episode columns too.
                if let Err(e) = self
                    .repository
                    .update_state(&id, JobState::Pending, None)
                    .await
                {
                    warn!(job_id = %id, error = %e, "Failed to persist recovered job");
                }
            } else if job.state.is_retryable() {
                self.store.cleanup(&id).await;
            }

            let pending = job.state == JobState::Pending;
            self.registry.restore(job);
            report.restored += 1;
            if pending && self.queue.push(id) {
                report.requeued += 1;
            }
        }

        info!(
            restored = report.restored,
            interrupted = report.interrupted,
            requeued = report.requeued,
            "Job recovery finished"
        );
        Ok(report)
    }

    /// Start dispatching queued jobs.
    pub fn start(&self) {
        self.pool.start(self.queue.clone(), self.worker.clone());
    }

    /// Stop dispatching and abort in-flight episodes.
    pub async fn shutdown(&self) {
        self.pool.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }
}
