//! In-memory job registry.
//!
//! The registry is the single authority for job state. Every transition is a
//! compare-and-set under the job's lock; the repository write and the status
//! event follow once the lock is released. A per-job async lock spans the
//! whole sequence, so writes and events leave in transition order.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::repositories::JobRepository;
use crate::domain::{Asset, Job, JobError, JobId, JobState, MediaReference};
use crate::downloader::ProgressTick;
use crate::progress::{ProgressBus, ProgressEvent};
use crate::{Error, Result};

struct SlotState {
    job: Job,
    /// Replaced whenever the job re-enters PENDING; a fired token cannot be reset.
    cancel: CancellationToken,
}

struct JobSlot {
    state: Mutex<SlotState>,
    /// Held from a change until its write and event are out.
    write_order: AsyncMutex<()>,
}

impl JobSlot {
    fn new(job: Job) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                job,
                cancel: CancellationToken::new(),
            }),
            write_order: AsyncMutex::new(()),
        })
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was pending and is now cancelled.
    Cancelled,
    /// The job is running; its worker was signalled.
    Signalled,
}

/// Tracks every known job and guards its transitions.
pub struct JobRegistry {
    slots: DashMap<JobId, Arc<JobSlot>>,
    repository: Arc<dyn JobRepository>,
    bus: ProgressBus,
}

impl JobRegistry {
    pub fn new(repository: Arc<dyn JobRepository>, bus: ProgressBus) -> Self {
        Self {
            slots: DashMap::new(),
            repository,
            bus,
        }
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    fn slot(&self, id: &JobId) -> Result<Arc<JobSlot>> {
        self.slots
            .get(id)
            .map(|slot| Arc::clone(&slot))
            .ok_or_else(|| Error::not_found("Job", id.as_str()))
    }

    /// Snapshot of a job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let slot = self.slots.get(id).map(|slot| Arc::clone(&slot))?;
        let job = slot.state.lock().job.clone();
        Some(job)
    }

    /// Snapshots of all jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let slots: Vec<_> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut jobs: Vec<Job> = slots.iter().map(|s| s.state.lock().job.clone()).collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Admit a brand new job: persist it, then make it visible.
    pub async fn insert(&self, job: Job) -> Result<Job> {
        if self.slots.contains_key(&job.id) {
            return Err(Error::conflict(format!("job {} already exists", job.id)));
        }
        self.repository.create_record(&job).await?;
        self.slots.insert(job.id.clone(), JobSlot::new(job.clone()));
        self.bus.publish(ProgressEvent::status(&job));
        Ok(job)
    }

    /// Register a job loaded from the repository.
    pub fn restore(&self, job: Job) {
        self.slots.insert(job.id.clone(), JobSlot::new(job));
    }

    /// Remove a terminal job's record.
    pub async fn remove(&self, id: &JobId) -> Result<Job> {
        let slot = self.slot(id)?;
        let job = {
            let state = slot.state.lock();
            if !state.job.state.is_terminal() {
                return Err(Error::invalid_transition(state.job.state, "deleted"));
            }
            state.job.clone()
        };
        self.slots.remove(id);
        self.repository.delete_record(id).await?;
        Ok(job)
    }

    /// Apply `transition` under the job lock, then persist and publish.
    async fn transition<F>(&self, id: &JobId, transition: F) -> Result<Job>
    where
        F: FnOnce(&mut SlotState) -> Result<()>,
    {
        let slot = self.slot(id)?;
        let _order = slot.write_order.lock().await;
        let snapshot = {
            let mut state = slot.state.lock();
            transition(&mut state)?;
            state.job.clone()
        };

        if let Err(e) = self
            .repository
            .update_state(id, snapshot.state, snapshot.error.as_ref())
            .await
        {
            warn!(job_id = %id, state = %snapshot.state, error = %e, "Failed to persist job state");
        }
        self.bus.publish(ProgressEvent::status(&snapshot));
        debug!(job_id = %id, state = %snapshot.state, "Job transitioned");
        Ok(snapshot)
    }

    /// PENDING -> RUNNING. Returns what the worker needs to run the episode.
    pub async fn begin(&self, id: &JobId) -> Result<(MediaReference, CancellationToken)> {
        let mut handoff = None;
        self.transition(id, |state| {
            state.job.start()?;
            handoff = Some((state.job.reference.clone(), state.cancel.clone()));
            Ok(())
        })
        .await?;
        handoff.ok_or_else(|| Error::Other(format!("job {id} did not start")))
    }

    /// Record a throttled progress figure for a running job.
    pub async fn report_progress(&self, id: &JobId, tick: ProgressTick) {
        let Ok(slot) = self.slot(id) else {
            return;
        };
        let _order = slot.write_order.lock().await;
        let recorded = {
            let mut state = slot.state.lock();
            state
                .job
                .record_progress(tick.percent, Some(tick.downloaded_bytes), tick.total_bytes)
                .then(|| state.job.progress)
        };
        let Some(percent) = recorded else {
            return;
        };

        if let Err(e) = self
            .repository
            .update_progress(id, percent, Some(tick.downloaded_bytes), tick.total_bytes)
            .await
        {
            warn!(job_id = %id, error = %e, "Failed to persist job progress");
        }
        self.bus.publish(ProgressEvent::progress(
            id.clone(),
            percent,
            Some(tick.downloaded_bytes),
            tick.total_bytes,
        ));
    }

    /// RUNNING -> COMPLETE, preceded by a final 100% progress event.
    pub async fn complete(&self, id: &JobId, asset: Asset) -> Result<Job> {
        let slot = self.slot(id)?;
        let _order = slot.write_order.lock().await;
        let snapshot = {
            let mut state = slot.state.lock();
            state.job.complete(asset.clone())?;
            state.job.clone()
        };

        if let Err(e) = self.repository.finalize_asset(id, &asset).await {
            warn!(job_id = %id, error = %e, "Failed to persist finalized asset");
        }
        if let Err(e) = self
            .repository
            .update_state(id, JobState::Complete, None)
            .await
        {
            warn!(job_id = %id, error = %e, "Failed to persist job state");
        }
        self.bus.publish(ProgressEvent::progress(
            id.clone(),
            100,
            Some(asset.size_bytes),
            Some(asset.size_bytes),
        ));
        self.bus.publish(ProgressEvent::status(&snapshot));
        debug!(job_id = %id, size = asset.size_bytes, "Job complete");
        Ok(snapshot)
    }

    /// RUNNING -> FAILED.
    pub async fn fail(&self, id: &JobId, error: JobError) -> Result<Job> {
        self.transition(id, |state| state.job.fail(error)).await
    }

    /// RUNNING -> CANCELLED, once the worker has stopped.
    pub async fn finish_cancelled(&self, id: &JobId) -> Result<Job> {
        self.transition(id, |state| state.job.cancel()).await
    }

    /// Handle a client cancel request.
    ///
    /// A pending job is cancelled on the spot. A running job only has its token
    /// fired; the worker performs the transition at its next checkpoint.
    pub async fn request_cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        let slot = self.slot(id)?;
        {
            let state = slot.state.lock();
            match state.job.state {
                JobState::Running => {
                    state.cancel.cancel();
                    return Ok(CancelOutcome::Signalled);
                }
                JobState::Pending => {}
                other => return Err(Error::invalid_transition(other, JobState::Cancelled)),
            }
        }

        // The job may have been dispatched in between; the CAS decides.
        match self.transition(id, |state| state.job.cancel()).await {
            Ok(_) => Ok(CancelOutcome::Cancelled),
            Err(Error::InvalidStateTransition { .. }) => {
                let state = slot.state.lock();
                match state.job.state {
                    JobState::Running => {
                        state.cancel.cancel();
                        Ok(CancelOutcome::Signalled)
                    }
                    other => Err(Error::invalid_transition(other, JobState::Cancelled)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// FAILED/CANCELLED -> PENDING with a fresh cancellation token.
    pub async fn reset(&self, id: &JobId) -> Result<Job> {
        self.transition(id, |state| {
            state.job.reset_for_retry()?;
            state.cancel = CancellationToken::new();
            Ok(())
        })
        .await
    }

    /// Whether cancellation was requested for the job's current episode.
    pub fn is_cancel_requested(&self, id: &JobId) -> bool {
        self.slots
            .get(id)
            .map(|slot| slot.state.lock().cancel.is_cancelled())
            .unwrap_or(false)
    }
}
