//! Fetch provider trait and related types.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{FailureCode, JobError, JobId, MediaReference};

/// What a provider is asked to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub reference: MediaReference,
    /// Final location of the asset.
    pub output_path: PathBuf,
    /// Where a thumbnail should be written, if the provider produces one.
    pub thumbnail_dir: Option<PathBuf>,
}

impl FetchRequest {
    pub fn new(reference: MediaReference, output_path: impl Into<PathBuf>) -> Self {
        Self {
            job_id: reference.job_id().clone(),
            reference,
            output_path: output_path.into(),
            thumbnail_dir: None,
        }
    }

    pub fn with_thumbnail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.thumbnail_dir = Some(dir.into());
        self
    }
}

/// Raw byte progress reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub downloaded_bytes: u64,
    /// Total or estimated size; `None` while unknown.
    pub total_bytes: Option<u64>,
}

impl FetchProgress {
    pub fn new(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            downloaded_bytes,
            total_bytes,
        }
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub content_type: String,
}

/// Channel a provider reports progress on.
///
/// Providers should use `try_send`: the consumer only cares about the most
/// recent figure, so a full channel just means a report can be skipped.
pub type ProgressSender = mpsc::Sender<FetchProgress>;

/// Why a fetch did not produce an asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The fetch stopped because its token was cancelled.
    #[error("fetch aborted")]
    Aborted,

    #[error("{code}: {detail}")]
    Failed { code: FailureCode, detail: String },
}

impl ProviderError {
    pub fn failed(code: FailureCode, detail: impl Into<String>) -> Self {
        Self::Failed {
            code,
            detail: detail.into(),
        }
    }

    /// Error detail to record on the job.
    pub fn to_job_error(&self) -> JobError {
        match self {
            Self::Aborted => JobError::new(FailureCode::Unknown, "fetch aborted"),
            Self::Failed { code, detail } => JobError::new(*code, detail.clone()),
        }
    }
}

/// Trait implemented by fetch providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Fetch the referenced media into `request.output_path`.
    ///
    /// Must return [`ProviderError::Aborted`] promptly once `cancel` fires.
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ProviderError>;

    /// Check if the provider can run on this host.
    fn is_available(&self) -> bool;

    /// Provider version, if known.
    fn version(&self) -> Option<String>;
}
