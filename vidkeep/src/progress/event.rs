use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobError, JobId, JobState};

/// Event carried by the progress bus and sent to realtime clients as JSON.
///
/// ```json
/// {"type":"progress","job_id":"dQw4w9WgXcQ","percent":42,"downloaded_bytes":420,"total_bytes":1000}
/// {"type":"status","job_id":"dQw4w9WgXcQ","state":"failed","error":{"code":"network","detail":"..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        job_id: JobId,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        downloaded_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },
    Status {
        job_id: JobId,
        state: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },
}

impl ProgressEvent {
    pub fn progress(
        job_id: JobId,
        percent: u8,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) -> Self {
        Self::Progress {
            job_id,
            percent,
            downloaded_bytes,
            total_bytes,
        }
    }

    /// Status event reflecting a job snapshot.
    pub fn status(job: &Job) -> Self {
        Self::Status {
            job_id: job.id.clone(),
            state: job.state,
            error: job.error.clone(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Progress { job_id, .. } | Self::Status { job_id, .. } => job_id,
        }
    }

    /// Whether this event announces a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { state, .. } if state.is_terminal())
    }
}
