//! Service configuration.
//!
//! All knobs are plain scalars read from the environment (after `.env` is
//! loaded by `dotenvy`), each with a default that works for a local setup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Default number of concurrent download workers.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default progress publication / cancellation checkpoint interval.
pub const DEFAULT_PROGRESS_THROTTLE_MS: u64 = 500;

/// Default time a provider gets to stop after being aborted.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5_000;

/// Default streaming chunk size (1 MiB).
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 1024 * 1024;

/// Default websocket keepalive ping interval.
pub const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 30;

/// Default per-connection outbound queue size.
pub const DEFAULT_WS_BUFFER: usize = 64;

const MIN_THROTTLE_MS: u64 = 10;
const MIN_STREAM_CHUNK_SIZE: usize = 4096;

/// Core service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of the asset store (`videos/` and `thumbnails/` live below it).
    pub data_dir: PathBuf,
    /// SQLite URL of the metadata store.
    pub database_url: String,
    /// Directory for rotated log files.
    pub log_dir: PathBuf,
    /// Size of the worker pool.
    pub worker_count: usize,
    /// Interval between progress publications and cancellation checks.
    pub progress_throttle: Duration,
    /// How long an aborted provider may take to stop before it is dropped.
    pub cancel_grace: Duration,
    /// Bytes per chunk when streaming assets.
    pub stream_chunk_size: usize,
    /// Websocket keepalive ping interval.
    pub ws_ping_interval: Duration,
    /// Outbound queue capacity per realtime connection.
    pub ws_buffer: usize,
    /// Path to the yt-dlp binary.
    pub ytdlp_path: String,
    /// Maximum video height requested from the provider.
    pub max_video_height: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_url: "sqlite:vidkeep.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("./logs"),
            worker_count: DEFAULT_WORKER_COUNT,
            progress_throttle: Duration::from_millis(DEFAULT_PROGRESS_THROTTLE_MS),
            cancel_grace: Duration::from_millis(DEFAULT_CANCEL_GRACE_MS),
            stream_chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
            ws_ping_interval: Duration::from_secs(DEFAULT_WS_PING_INTERVAL_SECS),
            ws_buffer: DEFAULT_WS_BUFFER,
            ytdlp_path: "yt-dlp".to_string(),
            max_video_height: 1080,
        }
    }
}

/// Read and parse an environment variable; unset, blank or unparsable values yield `None`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "Ignoring unparsable environment value");
                None
            }
        },
        _ => None,
    }
}

impl ServiceConfig {
    /// Load the configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `VIDKEEP_DATA_DIR`, `DATABASE_URL`, `VIDKEEP_LOG_DIR`
    /// - `VIDKEEP_WORKER_COUNT`
    /// - `VIDKEEP_PROGRESS_THROTTLE_MS`, `VIDKEEP_CANCEL_GRACE_MS`
    /// - `VIDKEEP_STREAM_CHUNK_SIZE`
    /// - `VIDKEEP_WS_PING_INTERVAL_SECS`, `VIDKEEP_WS_BUFFER`
    /// - `VIDKEEP_YTDLP_PATH`, `VIDKEEP_MAX_VIDEO_HEIGHT`
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_parse::<PathBuf>("VIDKEEP_DATA_DIR") {
            config.data_dir = dir;
        }
        if let Some(url) = env_parse::<String>("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = env_parse::<PathBuf>("VIDKEEP_LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(count) = env_parse("VIDKEEP_WORKER_COUNT") {
            config.worker_count = count;
        }
        if let Some(ms) = env_parse("VIDKEEP_PROGRESS_THROTTLE_MS") {
            config.progress_throttle = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("VIDKEEP_CANCEL_GRACE_MS") {
            config.cancel_grace = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse("VIDKEEP_STREAM_CHUNK_SIZE") {
            config.stream_chunk_size = size;
        }
        if let Some(secs) = env_parse("VIDKEEP_WS_PING_INTERVAL_SECS") {
            config.ws_ping_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse("VIDKEEP_WS_BUFFER") {
            config.ws_buffer = size;
        }
        if let Some(path) = env_parse::<String>("VIDKEEP_YTDLP_PATH") {
            config.ytdlp_path = path;
        }
        if let Some(height) = env_parse("VIDKEEP_MAX_VIDEO_HEIGHT") {
            config.max_video_height = height;
        }

        config
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        if self.progress_throttle < Duration::from_millis(MIN_THROTTLE_MS) {
            return Err(Error::config(format!(
                "progress throttle must be at least {MIN_THROTTLE_MS}ms"
            )));
        }
        if self.stream_chunk_size < MIN_STREAM_CHUNK_SIZE {
            return Err(Error::config(format!(
                "stream chunk size must be at least {MIN_STREAM_CHUNK_SIZE} bytes"
            )));
        }
        if self.ws_buffer == 0 {
            return Err(Error::config("websocket buffer must be at least 1"));
        }
        if self.ws_ping_interval.is_zero() {
            return Err(Error::config("websocket ping interval must be positive"));
        }
        Ok(())
    }

    /// Directory holding finished and partial video files.
    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir.join("videos")
    }

    /// Directory holding thumbnails.
    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }
}
