//! Asset store.
//!
//! Finished assets live at `videos/{id}.mp4`, thumbnails at
//! `thumbnails/{id}.jpg`. Every file the provider writes for a job
//! (`.part` files, per-format fragments, `.ytdl` state, temp files) shares
//! the `{id}.` prefix inside `videos/`, which is what cleanup keys on.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::domain::{Asset, JobId};
use crate::utils::fs::{ensure_dir_all_with_op, file_size, io_error, remove_file_if_exists};
use crate::{Error, Result};

/// Content type of finalized assets.
pub const ASSET_CONTENT_TYPE: &str = "video/mp4";

const ASSET_EXTENSION: &str = "mp4";
const THUMBNAIL_EXTENSION: &str = "jpg";

/// Stream of asset bytes, bounded to the requested range.
pub type AssetStream = ReaderStream<Take<File>>;

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

/// Filesystem layout for job artifacts.
#[derive(Debug, Clone)]
pub struct AssetStore {
    videos_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

impl AssetStore {
    pub fn new(videos_dir: impl Into<PathBuf>, thumbnails_dir: impl Into<PathBuf>) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            thumbnails_dir: thumbnails_dir.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.videos_dir(), config.thumbnails_dir())
    }

    /// Create the store directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        ensure_dir_all_with_op("creating videos directory", &self.videos_dir).await?;
        ensure_dir_all_with_op("creating thumbnails directory", &self.thumbnails_dir).await
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    pub fn thumbnails_dir(&self) -> &Path {
        &self.thumbnails_dir
    }

    /// Where the finalized asset for a job lives.
    pub fn asset_path(&self, id: &JobId) -> PathBuf {
        self.videos_dir.join(format!("{id}.{ASSET_EXTENSION}"))
    }

    pub fn thumbnail_path(&self, id: &JobId) -> PathBuf {
        self.thumbnails_dir
            .join(format!("{id}.{THUMBNAIL_EXTENSION}"))
    }

    /// Every file in `dir` belonging to the job, i.e. named `{id}.*`.
    async fn files_for(dir: &Path, id: &JobId) -> Result<Vec<PathBuf>> {
        let prefix = format!("{id}.");
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("listing store directory", dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing store directory", dir, e))?
        {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
            {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// List the job's files in `videos/` (final asset and partials).
    pub async fn artifacts(&self, id: &JobId) -> Result<Vec<PathBuf>> {
        Self::files_for(&self.videos_dir, id).await
    }

    async fn remove_paths(paths: Vec<PathBuf>, report: &mut CleanupReport) {
        for path in paths {
            match remove_file_if_exists(&path).await {
                Ok(true) => report.removed.push(path),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to remove job artifact");
                    report.failed += 1;
                }
            }
        }
    }

    /// Remove every artifact of a job: final file, partials and thumbnail.
    ///
    /// Idempotent and best effort; failures are logged, never returned.
    pub async fn cleanup(&self, id: &JobId) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.artifacts(id).await {
            Ok(paths) => Self::remove_paths(paths, &mut report).await,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Failed to list job artifacts");
                report.failed += 1;
            }
        }
        match Self::files_for(&self.thumbnails_dir, id).await {
            Ok(paths) => Self::remove_paths(paths, &mut report).await,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Failed to list job thumbnails");
                report.failed += 1;
            }
        }

        if !report.removed.is_empty() {
            debug!(job_id = %id, removed = report.removed.len(), "Cleaned up job artifacts");
        }
        report
    }

    /// Remove leftovers of a finished fetch, keeping only the final asset.
    pub async fn prune_partials(&self, id: &JobId) -> CleanupReport {
        let mut report = CleanupReport::default();
        let keep = self.asset_path(id);
        match self.artifacts(id).await {
            Ok(paths) => {
                let partials = paths.into_iter().filter(|p| *p != keep).collect();
                Self::remove_paths(partials, &mut report).await;
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Failed to list job artifacts");
                report.failed += 1;
            }
        }
        report
    }

    /// Stat the final asset after a successful fetch.
    pub async fn finalize(&self, id: &JobId, content_type: &str) -> Result<Asset> {
        let path = self.asset_path(id);
        match file_size(&path).await? {
            Some(size) if size > 0 => Ok(Asset {
                id: id.clone(),
                path,
                size_bytes: size,
                content_type: content_type.to_string(),
            }),
            Some(_) => Err(Error::validation(format!(
                "asset {} is empty",
                path.display()
            ))),
            None => Err(Error::not_found("Asset", path.display().to_string())),
        }
    }

    /// Open an asset and return its current size.
    pub async fn open(&self, path: &Path) -> Result<(File, u64)> {
        let file = File::open(path)
            .await
            .map_err(|e| io_error("opening asset", path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error("reading asset metadata", path, e))?
            .len();
        Ok((file, size))
    }

    /// Turn an open asset into a chunked stream of `len` bytes starting at `start`.
    pub async fn stream_range(
        mut file: File,
        start: u64,
        len: u64,
        chunk_size: usize,
    ) -> std::io::Result<AssetStream> {
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        Ok(ReaderStream::with_capacity(file.take(len), chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> AssetStore {
        AssetStore::new(dir.path().join("videos"), dir.path().join("thumbnails"))
    }

    fn id() -> JobId {
        JobId::parse("dQw4w9WgXcQ").unwrap()
    }

    async fn touch(path: &Path, bytes: &[u8]) {
        tokio::fs::write(path, bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_every_partial_pattern() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_layout().await.unwrap();

        let videos = store.videos_dir().to_path_buf();
        for name in [
            "dQw4w9WgXcQ.mp4",
            "dQw4w9WgXcQ.mp4.part",
            "dQw4w9WgXcQ.mp4.part-Frag3",
            "dQw4w9WgXcQ.f137.mp4",
            "dQw4w9WgXcQ.f140.m4a",
            "dQw4w9WgXcQ.mp4.ytdl",
            "dQw4w9WgXcQ.temp.mp4",
        ] {
            touch(&videos.join(name), b"x").await;
        }
        touch(&videos.join("otherVideo1.mp4"), b"keep").await;
        touch(&store.thumbnail_path(&id()), b"jpg").await;

        let report = store.cleanup(&id()).await;
        assert_eq!(report.removed.len(), 8);
        assert_eq!(report.failed, 0);
        assert!(store.artifacts(&id()).await.unwrap().is_empty());
        assert!(!store.thumbnail_path(&id()).exists());
        assert!(videos.join("otherVideo1.mp4").exists());

        // second pass is a no-op
        let report = store.cleanup(&id()).await;
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_on_missing_directories() {
        let dir = TempDir::new().unwrap();
        let report = store(&dir).cleanup(&id()).await;
        assert_eq!(report, CleanupReport::default());
    }

    #[tokio::test]
    async fn test_prune_keeps_final_asset() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_layout().await.unwrap();
        touch(&store.asset_path(&id()), b"video").await;
        touch(&store.videos_dir().join("dQw4w9WgXcQ.f137.mp4"), b"frag").await;

        store.prune_partials(&id()).await;
        assert_eq!(
            store.artifacts(&id()).await.unwrap(),
            vec![store.asset_path(&id())]
        );
    }

    #[tokio::test]
    async fn test_finalize_requires_non_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_layout().await.unwrap();

        assert!(store.finalize(&id(), ASSET_CONTENT_TYPE).await.unwrap_err().is_not_found());

        touch(&store.asset_path(&id()), b"").await;
        assert!(store.finalize(&id(), ASSET_CONTENT_TYPE).await.is_err());

        touch(&store.asset_path(&id()), b"0123456789").await;
        let asset = store.finalize(&id(), ASSET_CONTENT_TYPE).await.unwrap();
        assert_eq!(asset.size_bytes, 10);
        assert_eq!(asset.content_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_stream_range_yields_requested_slice() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_layout().await.unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        touch(&store.asset_path(&id()), &data).await;

        let (file, size) = store.open(&store.asset_path(&id())).await.unwrap();
        assert_eq!(size, 10_000);

        let mut stream = AssetStore::stream_range(file, 1000, 5000, 4096).await.unwrap();
        let mut out = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 4096);
            out.extend_from_slice(&chunk);
            chunks += 1;
        }
        assert!(chunks >= 2);
        assert_eq!(out, &data[1000..6000]);
    }
}
