//! Job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::JobDbModel;
use crate::database::time::now_ms;
use crate::domain::{Asset, Job, JobError, JobId, JobState};
use crate::{Error, Result};

/// Durable storage for job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_record(&self, job: &Job) -> Result<()>;
    /// Persist a state change. Entering `pending` clears the episode fields,
    /// entering `running` stamps `started_at`, terminal states stamp `finished_at`.
    async fn update_state(&self, id: &JobId, state: JobState, error: Option<&JobError>)
    -> Result<()>;
    async fn update_progress(
        &self,
        id: &JobId,
        percent: u8,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) -> Result<()>;
    async fn finalize_asset(&self, id: &JobId, asset: &Asset) -> Result<()>;
    async fn delete_record(&self, id: &JobId) -> Result<()>;
    async fn get_record(&self, id: &JobId) -> Result<Job>;
    /// All records, oldest first.
    async fn list_records(&self) -> Result<Vec<Job>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn opt_i64(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_record(&self, job: &Job) -> Result<()> {
        let row = JobDbModel::from(job);
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, reference, state, progress, downloaded_bytes, total_bytes,
                error_code, error_detail, asset_path, asset_size, content_type,
                created_at, started_at, finished_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.reference)
        .bind(&row.state)
        .bind(row.progress)
        .bind(row.downloaded_bytes)
        .bind(row.total_bytes)
        .bind(&row.error_code)
        .bind(&row.error_detail)
        .bind(&row.asset_path)
        .bind(row.asset_size)
        .bind(&row.content_type)
        .bind(row.created_at)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::conflict(format!("job {} already exists", job.id))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn update_state(
        &self,
        id: &JobId,
        state: JobState,
        error: Option<&JobError>,
    ) -> Result<()> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?1,
                error_code = ?2,
                error_detail = ?3,
                progress = CASE WHEN ?1 IN ('pending', 'running') THEN 0 ELSE progress END,
                downloaded_bytes = CASE WHEN ?1 IN ('pending', 'running') THEN NULL ELSE downloaded_bytes END,
                total_bytes = CASE WHEN ?1 IN ('pending', 'running') THEN NULL ELSE total_bytes END,
                asset_path = CASE WHEN ?1 = 'pending' THEN NULL ELSE asset_path END,
                asset_size = CASE WHEN ?1 = 'pending' THEN NULL ELSE asset_size END,
                content_type = CASE WHEN ?1 = 'pending' THEN NULL ELSE content_type END,
                started_at = CASE
                    WHEN ?1 = 'running' THEN ?4
                    WHEN ?1 = 'pending' THEN NULL
                    ELSE started_at END,
                finished_at = CASE
                    WHEN ?1 IN ('complete', 'failed', 'cancelled') THEN ?4
                    ELSE NULL END,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(state.as_str())
        .bind(error.map(|e| e.code.to_string()))
        .bind(error.map(|e| e.detail.clone()))
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", id.as_str()));
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: &JobId,
        percent: u8,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) -> Result<()> {
        // Only a running job accepts progress, and it never moves backwards.
        sqlx::query(
            r#"
            UPDATE jobs SET
                progress = MAX(progress, ?),
                downloaded_bytes = ?,
                total_bytes = ?,
                updated_at = ?
            WHERE id = ? AND state = 'running'
            "#,
        )
        .bind(i64::from(percent.min(100)))
        .bind(opt_i64(downloaded_bytes))
        .bind(opt_i64(total_bytes))
        .bind(now_ms())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_asset(&self, id: &JobId, asset: &Asset) -> Result<()> {
        let size = i64::try_from(asset.size_bytes).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                asset_path = ?,
                asset_size = ?,
                content_type = ?,
                progress = 100,
                downloaded_bytes = ?,
                total_bytes = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(asset.path.to_string_lossy().into_owned())
        .bind(size)
        .bind(&asset.content_type)
        .bind(size)
        .bind(size)
        .bind(now_ms())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", id.as_str()));
        }
        Ok(())
    }

    async fn delete_record(&self, id: &JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_record(&self, id: &JobId) -> Result<Job> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id.as_str()))?
            .try_into()
    }

    async fn list_records(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match Job::try_from(row) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Skipping unreadable job record"),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, run_migrations};
    use crate::domain::{FailureCode, MediaReference};
    use std::path::PathBuf;

    async fn repo() -> SqlxJobRepository {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxJobRepository::new(pool)
    }

    fn job(url: &str) -> Job {
        Job::new(MediaReference::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repo().await;
        let job = job("youtu.be/dQw4w9WgXcQ");
        repo.create_record(&job).await.unwrap();

        let stored = repo.get_record(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.reference.as_str(), job.reference.as_str());

        let err = repo.create_record(&job).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_updates() {
        let repo = repo().await;
        let job = job("youtu.be/dQw4w9WgXcQ");
        repo.create_record(&job).await.unwrap();

        repo.update_state(&job.id, JobState::Running, None).await.unwrap();
        repo.update_progress(&job.id, 40, Some(400), Some(1000)).await.unwrap();
        repo.update_progress(&job.id, 20, Some(450), Some(1000)).await.unwrap();

        let stored = repo.get_record(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Running);
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.downloaded_bytes, Some(450));
        assert!(stored.started_at.is_some());

        let asset = Asset {
            id: job.id.clone(),
            path: PathBuf::from("/data/videos/dQw4w9WgXcQ.mp4"),
            size_bytes: 1000,
            content_type: "video/mp4".to_string(),
        };
        repo.finalize_asset(&job.id, &asset).await.unwrap();
        repo.update_state(&job.id, JobState::Complete, None).await.unwrap();

        let stored = repo.get_record(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Complete);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.asset, Some(asset));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_then_retry_clears_episode() {
        let repo = repo().await;
        let job = job("youtu.be/dQw4w9WgXcQ");
        repo.create_record(&job).await.unwrap();
        repo.update_state(&job.id, JobState::Running, None).await.unwrap();
        repo.update_progress(&job.id, 70, Some(70), Some(100)).await.unwrap();

        let error = JobError::new(FailureCode::Unavailable, "Video unavailable");
        repo.update_state(&job.id, JobState::Failed, Some(&error)).await.unwrap();
        let stored = repo.get_record(&job.id).await.unwrap();
        assert_eq!(stored.error, Some(error));
        assert_eq!(stored.progress, 70);

        repo.update_state(&job.id, JobState::Pending, None).await.unwrap();
        let stored = repo.get_record(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.progress, 0);
        assert!(stored.error.is_none());
        assert!(stored.started_at.is_none());
        assert!(stored.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_progress_ignored_unless_running() {
        let repo = repo().await;
        let job = job("youtu.be/dQw4w9WgXcQ");
        repo.create_record(&job).await.unwrap();
        repo.update_progress(&job.id, 50, Some(5), Some(10)).await.unwrap();
        assert_eq!(repo.get_record(&job.id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = repo().await;
        let first = job("youtu.be/aaaaaaaaaaa");
        let mut second = job("youtu.be/bbbbbbbbbbb");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        repo.create_record(&second).await.unwrap();
        repo.create_record(&first).await.unwrap();

        let ids: Vec<_> = repo
            .list_records()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(ids, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);

        repo.delete_record(&first.id).await.unwrap();
        assert!(repo.get_record(&first.id).await.unwrap_err().is_not_found());
        assert!(repo.update_state(&first.id, JobState::Running, None).await.is_err());
    }
}
