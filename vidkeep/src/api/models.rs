//! API request and response models (DTOs).
//!
//! Filesystem paths never leave the process: assets are addressed by the
//! stream and thumbnail URLs derived from the job id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobError, JobState};

// ============================================================================
// Jobs
// ============================================================================

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    /// URL of the media to ingest.
    pub reference: String,
}

/// Reply to an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub state: JobState,
    pub message: String,
}

/// Reply to cancel and retry.
#[derive(Debug, Clone, Serialize)]
pub struct JobStateResponse {
    pub job_id: String,
    pub state: JobState,
}

/// Finalized asset metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AssetResponse {
    pub size_bytes: u64,
    pub content_type: String,
    pub stream_url: String,
}

/// Full job view.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub reference: String,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetResponse>,
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let id = job.id.to_string();
        Self {
            reference: job.reference.as_str().to_string(),
            state: job.state,
            progress: job.progress,
            downloaded_bytes: job.downloaded_bytes,
            total_bytes: job.total_bytes,
            error: job.error,
            asset: job.asset.map(|asset| AssetResponse {
                size_bytes: asset.size_bytes,
                content_type: asset.content_type,
                stream_url: format!("/api/stream/{id}"),
            }),
            thumbnail_url: format!("/api/thumbnail/{id}"),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            id,
        }
    }
}

// ============================================================================
// Media
// ============================================================================

/// Query of `GET /api/thumbnail/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailQuery {
    /// Serve a placeholder image when no thumbnail exists.
    #[serde(default = "default_fallback")]
    pub fallback: bool,
}

impl Default for ThumbnailQuery {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
        }
    }
}

fn default_fallback() -> bool {
    true
}

// ============================================================================
// Logging
// ============================================================================

/// Body of `PUT /api/logging/filter`.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "healthy".to_string(),
            message: None,
        }
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: "unhealthy".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
