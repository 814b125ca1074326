//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use vidkeep::config::ServiceConfig;
use vidkeep::database::{DbPool, init_pool, run_migrations};
use vidkeep::domain::{FailureCode, Job, JobId, JobState};
use vidkeep::downloader::{
    FetchOutcome, FetchProgress, FetchProvider, FetchRequest, ProgressSender, ProviderError,
};
use vidkeep::services::ServiceContainer;

/// Create an in-memory database with migrations applied.
pub async fn setup_test_db() -> DbPool {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// `https://youtu.be/{id}`.
pub fn reference(id: &str) -> String {
    format!("https://youtu.be/{id}")
}

pub fn job_id(id: &str) -> JobId {
    JobId::parse(id).unwrap()
}

/// Deterministic asset contents so ranges can be checked byte for byte.
pub fn asset_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// How the fake provider handles one media id.
#[derive(Clone)]
pub enum Behavior {
    /// Write `size` bytes, reporting progress at each percent in `steps`.
    Succeed { size: usize, steps: Vec<u8> },
    /// Report `percent`, leave a partial file and wait for cancellation.
    Hang { size: usize, percent: u8 },
    /// Wait for `gate` (or cancellation), then succeed.
    Gated { size: usize, gate: Arc<Notify> },
    /// Fail with the given category.
    Fail { code: FailureCode, detail: String },
    /// Ignore cancellation for `delay` before finally returning `Aborted`.
    Stubborn { delay: Duration },
}

impl Behavior {
    pub fn succeed(size: usize) -> Self {
        Self::Succeed {
            size,
            steps: vec![25, 50, 75],
        }
    }

    pub fn fail(code: FailureCode, detail: &str) -> Self {
        Self::Fail {
            code,
            detail: detail.to_string(),
        }
    }
}

/// Scripted stand-in for yt-dlp.
#[derive(Default)]
pub struct FakeProvider {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    step_delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, id: &str, behavior: Behavior) {
        self.behaviors.lock().insert(id.to_string(), behavior);
    }

    pub fn set_step_delay(&self, delay: Duration) {
        *self.step_delay.lock() = Some(delay);
    }

    /// Ids fetched so far, in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Highest number of concurrent fetches observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behavior(&self, id: &str) -> Behavior {
        self.behaviors
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Behavior::succeed(4096))
    }

    fn step_delay(&self) -> Duration {
        self.step_delay
            .lock()
            .unwrap_or(Duration::from_millis(40))
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn io_failure(e: std::io::Error) -> ProviderError {
    ProviderError::failed(FailureCode::Io, e.to_string())
}

async fn write_asset(request: &FetchRequest, size: usize) -> Result<FetchOutcome, ProviderError> {
    tokio::fs::write(&request.output_path, asset_bytes(size))
        .await
        .map_err(io_failure)?;
    Ok(FetchOutcome {
        path: request.output_path.clone(),
        content_type: "video/mp4".to_string(),
    })
}

fn partial_path(request: &FetchRequest) -> std::path::PathBuf {
    request.output_path.with_extension("mp4.part")
}

#[async_trait]
impl FetchProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ProviderError> {
        let id = request.job_id.to_string();
        self.calls.lock().push(id.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);
        let delay = self.step_delay();

        match self.behavior(&id) {
            Behavior::Succeed { size, steps } => {
                let total = size as u64;
                for percent in steps {
                    let _ = progress.try_send(FetchProgress::new(
                        total * u64::from(percent) / 100,
                        Some(total),
                    ));
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ProviderError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let _ = progress.try_send(FetchProgress::new(total, Some(total)));
                tokio::time::sleep(delay).await;
                write_asset(&request, size).await
            }
            Behavior::Hang { size, percent } => {
                let total = size as u64;
                let done = total * u64::from(percent) / 100;
                tokio::fs::write(partial_path(&request), asset_bytes(done as usize))
                    .await
                    .map_err(io_failure)?;
                let _ = progress.try_send(FetchProgress::new(done, Some(total)));
                cancel.cancelled().await;
                Err(ProviderError::Aborted)
            }
            Behavior::Gated { size, gate } => {
                tokio::fs::write(partial_path(&request), b"partial")
                    .await
                    .map_err(io_failure)?;
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Aborted),
                    _ = gate.notified() => write_asset(&request, size).await,
                }
            }
            Behavior::Fail { code, detail } => {
                tokio::fs::write(partial_path(&request), b"partial")
                    .await
                    .map_err(io_failure)?;
                tokio::time::sleep(delay).await;
                Err(ProviderError::failed(code, detail))
            }
            Behavior::Stubborn { delay } => {
                tokio::fs::write(partial_path(&request), b"partial")
                    .await
                    .map_err(io_failure)?;
                cancel.cancelled().await;
                tokio::time::sleep(delay).await;
                Err(ProviderError::Aborted)
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn version(&self) -> Option<String> {
        Some("test".to_string())
    }
}

/// A fully wired service graph over a temp directory.
pub struct Harness {
    pub dir: TempDir,
    pub provider: Arc<FakeProvider>,
    pub services: ServiceContainer,
}

impl Harness {
    pub fn config(dir: &TempDir, workers: usize) -> ServiceConfig {
        ServiceConfig {
            data_dir: dir.path().to_path_buf(),
            worker_count: workers,
            progress_throttle: Duration::from_millis(20),
            cancel_grace: Duration::from_millis(300),
            stream_chunk_size: 4096,
            ..Default::default()
        }
    }

    /// Build and initialize with `workers` concurrent slots.
    pub async fn start(workers: usize) -> Self {
        Self::start_with(FakeProvider::new(), workers).await
    }

    pub async fn start_with(provider: Arc<FakeProvider>, workers: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_test_db().await;
        let services = ServiceContainer::new(&Self::config(&dir, workers), pool, provider.clone());
        services.initialize().await.unwrap();
        Self {
            dir,
            provider,
            services,
        }
    }

    /// Like [`Harness::start`] but without starting the worker pool.
    pub async fn paused(workers: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_test_db().await;
        let provider = FakeProvider::new();
        let services = ServiceContainer::new(&Self::config(&dir, workers), pool, provider.clone());
        services.store.ensure_layout().await.unwrap();
        Self {
            dir,
            provider,
            services,
        }
    }

    pub fn videos_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("videos")
    }

    /// Files under `videos/` belonging to `id`.
    pub fn artifacts(&self, id: &str) -> Vec<String> {
        let prefix = format!("{id}.");
        std::fs::read_dir(self.videos_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .filter(|name| name.starts_with(&prefix))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn job(&self, id: &str) -> Job {
        self.services.scheduler.get(&job_id(id)).unwrap()
    }

    /// Poll until the job reaches `state` or the timeout elapses.
    pub async fn wait_for(&self, id: &str, state: JobState) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.job(id);
            if job.state == state {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {} waiting for {state}",
                job.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the job reports at least `percent`.
    pub async fn wait_for_progress(&self, id: &str, percent: u8) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.job(id).progress < percent {
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} never reached {percent}%"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
