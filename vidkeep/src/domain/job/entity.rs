//! Job entity.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobState;
use crate::Error;
use crate::domain::{JobId, MediaReference};

/// Category of a provider failure recorded on a failed job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCode {
    /// The source could not be reached or the transfer broke off.
    Network,
    /// The media does not exist or was removed.
    Unavailable,
    /// The media exists but cannot be fetched (private, age or region gated).
    Restricted,
    /// The provider produced something unusable.
    Malformed,
    /// Local filesystem trouble while fetching.
    Io,
    /// Anything the provider did not explain.
    Unknown,
}

/// Error detail attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: FailureCode,
    pub detail: String,
}

impl JobError {
    pub fn new(code: FailureCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// The durable artifact produced by a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: JobId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: String,
}

/// An ingestion job tracked from admission to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub reference: MediaReference,
    pub state: JobState,
    pub progress: u8,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub error: Option<JobError>,
    pub asset: Option<Asset>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job for a reference.
    pub fn new(reference: MediaReference) -> Self {
        Self {
            id: reference.job_id().clone(),
            reference,
            state: JobState::Pending,
            progress: 0,
            downloaded_bytes: None,
            total_bytes: None,
            error: None,
            asset: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, target: JobState) -> Result<(), Error> {
        self.state = self.state.transition_to(target)?;
        Ok(())
    }

    /// Transition to RUNNING for a fresh episode.
    pub fn start(&mut self) -> Result<(), Error> {
        self.transition(JobState::Running)?;
        self.progress = 0;
        self.downloaded_bytes = None;
        self.total_bytes = None;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a progress figure for the running episode.
    ///
    /// Percent never goes backwards; returns `true` when the stored figures changed.
    pub fn record_progress(
        &mut self,
        percent: u8,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        let percent = percent.min(100).max(self.progress);
        let changed = percent != self.progress
            || downloaded_bytes != self.downloaded_bytes
            || total_bytes != self.total_bytes;
        self.progress = percent;
        self.downloaded_bytes = downloaded_bytes;
        self.total_bytes = total_bytes;
        changed
    }

    /// Transition to COMPLETE with the finalized asset.
    pub fn complete(&mut self, asset: Asset) -> Result<(), Error> {
        self.transition(JobState::Complete)?;
        self.progress = 100;
        self.downloaded_bytes = Some(asset.size_bytes);
        self.total_bytes = Some(asset.size_bytes);
        self.asset = Some(asset);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Transition to FAILED with an error detail.
    pub fn fail(&mut self, error: JobError) -> Result<(), Error> {
        self.transition(JobState::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Transition to CANCELLED.
    pub fn cancel(&mut self) -> Result<(), Error> {
        self.transition(JobState::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Reset a failed or cancelled job back to PENDING.
    pub fn reset_for_retry(&mut self) -> Result<(), Error> {
        self.transition(JobState::Pending)?;
        self.clear_episode();
        Ok(())
    }

    /// Reset a job left RUNNING by a previous process back to PENDING.
    ///
    /// Returns `false` if the job was not running.
    pub fn recover_interrupted(&mut self) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.state = JobState::Pending;
        self.clear_episode();
        true
    }

    fn clear_episode(&mut self) {
        self.progress = 0;
        self.downloaded_bytes = None;
        self.total_bytes = None;
        self.error = None;
        self.asset = None;
        self.started_at = None;
        self.finished_at = None;
    }
}
