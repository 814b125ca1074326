//! Download worker.
//!
//! Runs one job episode: claims the job, drives the provider, throttles its
//! progress into the registry and lands the job in exactly one terminal
//! state. The throttle tick doubles as the cancellation checkpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::provider::{FetchOutcome, FetchProvider, FetchRequest, ProviderError};
use super::throttle::ProgressThrottle;
use crate::config::{DEFAULT_CANCEL_GRACE_MS, DEFAULT_PROGRESS_THROTTLE_MS};
use crate::domain::{FailureCode, JobError, JobId, JobState};
use crate::scheduler::JobRegistry;
use crate::store::AssetStore;

/// Buffer between the provider and the worker's progress loop.
const PROVIDER_PROGRESS_CAPACITY: usize = 32;

/// Worker timing knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between progress publications and cancellation checks.
    pub progress_throttle: Duration,
    /// How long an aborted provider may take to stop.
    pub cancel_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_throttle: Duration::from_millis(DEFAULT_PROGRESS_THROTTLE_MS),
            cancel_grace: Duration::from_millis(DEFAULT_CANCEL_GRACE_MS),
        }
    }
}

/// How the provider phase of an episode ended.
enum Episode {
    Fetched(FetchOutcome),
    Failed(ProviderError),
    /// `provider_stopped` is false when the provider still has to wind down.
    Cancelled { provider_stopped: bool },
}

/// Executes job episodes against a fetch provider.
pub struct DownloadWorker {
    registry: Arc<JobRegistry>,
    store: Arc<AssetStore>,
    provider: Arc<dyn FetchProvider>,
    config: WorkerConfig,
}

impl DownloadWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<AssetStore>,
        provider: Arc<dyn FetchProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            provider,
            config,
        }
    }

    /// Run one episode of a job.
    ///
    /// Returns the terminal state reached, or `None` when the job was no longer
    /// pending (cancelled or deleted while queued).
    pub async fn run(&self, job_id: &JobId) -> Option<JobState> {
        let (reference, cancel) = match self.registry.begin(job_id).await {
            Ok(handoff) => handoff,
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "Skipping job that is no longer pending");
                return None;
            }
        };
        info!(job_id = %job_id, provider = self.provider.name(), "Starting download");

        let request = FetchRequest::new(reference, self.store.asset_path(job_id))
            .with_thumbnail_dir(self.store.thumbnails_dir());
        let (progress_tx, mut progress_rx) = mpsc::channel(PROVIDER_PROGRESS_CAPACITY);
        let provider_cancel = cancel.child_token();

        // Owned so an abandoned provider can be dropped before the cleanup sweep.
        let mut fetch = Box::pin(
            self.provider
                .fetch(request, progress_tx, provider_cancel.clone()),
        );

        let mut throttle = ProgressThrottle::new();
        let mut ticker = tokio::time::interval(self.config.progress_throttle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut progress_open = true;
        let episode = loop {
            tokio::select! {
                result = &mut fetch => {
                    break match result {
                        Ok(outcome) => Episode::Fetched(outcome),
                        Err(ProviderError::Aborted) if cancel.is_cancelled() => {
                            Episode::Cancelled { provider_stopped: true }
                        }
                        Err(e) => Episode::Failed(e),
                    };
                }
                report = progress_rx.recv(), if progress_open => match report {
                    Some(report) => throttle.observe(report),
                    None => progress_open = false,
                },
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        break Episode::Cancelled { provider_stopped: false };
                    }
                    if let Some(tick) = throttle.take_due() {
                        self.registry.report_progress(job_id, tick).await;
                    }
                }
            }
        };

        let state = match episode {
            Episode::Cancelled { provider_stopped } => {
                provider_cancel.cancel();
                if !provider_stopped
                    && tokio::time::timeout(self.config.cancel_grace, &mut fetch)
                        .await
                        .is_err()
                {
                    warn!(
                        job_id = %job_id,
                        grace_ms = self.config.cancel_grace.as_millis() as u64,
                        "Provider did not stop within grace period, abandoning it"
                    );
                }
                drop(fetch);
                self.store.cleanup(job_id).await;
                self.land(job_id, None).await
            }
            Episode::Failed(err) => {
                warn!(job_id = %job_id, error = %err, "Download failed");
                self.store.cleanup(job_id).await;
                self.land(job_id, Some(err.to_job_error())).await
            }
            Episode::Fetched(outcome) => self.finish(job_id, outcome).await,
        };

        Some(state)
    }

    async fn finish(&self, job_id: &JobId, outcome: FetchOutcome) -> JobState {
        match self.store.finalize(job_id, &outcome.content_type).await {
            Ok(asset) => {
                self.store.prune_partials(job_id).await;
                match self.registry.complete(job_id, asset).await {
                    Ok(_) => {
                        info!(job_id = %job_id, "Download complete");
                        JobState::Complete
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed to complete job");
                        self.current_state(job_id)
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Provider reported success but the asset is unusable");
                self.store.cleanup(job_id).await;
                let error = JobError::new(FailureCode::Malformed, e.to_string());
                self.land(job_id, Some(error)).await
            }
        }
    }

    /// Record the terminal state: FAILED with `error`, CANCELLED without.
    async fn land(&self, job_id: &JobId, error: Option<JobError>) -> JobState {
        let result = match error {
            Some(error) => self.registry.fail(job_id, error).await,
            None => self.registry.finish_cancelled(job_id).await,
        };
        match result {
            Ok(job) => job.state,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to record terminal state");
                self.current_state(job_id)
            }
        }
    }

    fn current_state(&self, job_id: &JobId) -> JobState {
        self.registry
            .get(job_id)
            .map(|job| job.state)
            .unwrap_or(JobState::Failed)
    }
}
