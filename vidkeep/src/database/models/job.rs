//! Job database model.

use std::path::PathBuf;

use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, opt_datetime_to_ms, opt_ms_to_datetime, ms_to_datetime};
use crate::domain::{Asset, FailureCode, Job, JobError, JobId, JobState, MediaReference};
use crate::{Error, Result};

/// Row of the `jobs` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct JobDbModel {
    pub id: String,
    /// Normalized media reference URL.
    pub reference: String,
    /// pending, running, complete, failed, cancelled
    pub state: String,
    pub progress: i64,
    pub downloaded_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub asset_path: Option<String>,
    pub asset_size: Option<i64>,
    pub content_type: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<&Job> for JobDbModel {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            reference: job.reference.as_str().to_string(),
            state: job.state.as_str().to_string(),
            progress: i64::from(job.progress),
            downloaded_bytes: job.downloaded_bytes.map(to_i64),
            total_bytes: job.total_bytes.map(to_i64),
            error_code: job.error.as_ref().map(|e| e.code.to_string()),
            error_detail: job.error.as_ref().map(|e| e.detail.clone()),
            asset_path: job
                .asset
                .as_ref()
                .map(|a| a.path.to_string_lossy().into_owned()),
            asset_size: job.asset.as_ref().map(|a| to_i64(a.size_bytes)),
            content_type: job.asset.as_ref().map(|a| a.content_type.clone()),
            created_at: datetime_to_ms(job.created_at),
            started_at: opt_datetime_to_ms(job.started_at),
            finished_at: opt_datetime_to_ms(job.finished_at),
            updated_at: crate::database::time::now_ms(),
        }
    }
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(row: JobDbModel) -> Result<Self> {
        let id = JobId::parse(&row.id)
            .map_err(|_| Error::validation(format!("stored job has invalid id '{}'", row.id)))?;
        let state = JobState::parse(&row.state).ok_or_else(|| {
            Error::validation(format!("job {} has unknown state '{}'", row.id, row.state))
        })?;

        let error = match (row.error_code, row.error_detail) {
            (Some(code), detail) => Some(JobError::new(
                code.parse().unwrap_or(FailureCode::Unknown),
                detail.unwrap_or_default(),
            )),
            (None, Some(detail)) => Some(JobError::new(FailureCode::Unknown, detail)),
            (None, None) => None,
        };

        let asset = row.asset_path.map(|path| Asset {
            id: id.clone(),
            path: PathBuf::from(path),
            size_bytes: row.asset_size.map(to_u64).unwrap_or(0),
            content_type: row
                .content_type
                .unwrap_or_else(|| crate::store::ASSET_CONTENT_TYPE.to_string()),
        });

        Ok(Job {
            reference: MediaReference::from_trusted(id.clone(), row.reference),
            id,
            state,
            progress: row.progress.clamp(0, 100) as u8,
            downloaded_bytes: row.downloaded_bytes.map(to_u64),
            total_bytes: row.total_bytes.map(to_u64),
            error,
            asset,
            created_at: ms_to_datetime(row.created_at),
            started_at: opt_ms_to_datetime(row.started_at),
            finished_at: opt_ms_to_datetime(row.finished_at),
        })
    }
}
