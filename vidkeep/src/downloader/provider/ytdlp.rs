//! yt-dlp fetch provider.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process::{ProcessExit, own_process_group, spawn_process_waiter};
use super::traits::{
    FetchOutcome, FetchProgress, FetchProvider, FetchRequest, ProgressSender, ProviderError,
};
use crate::domain::FailureCode;
use crate::store::ASSET_CONTENT_TYPE;

/// Marker prefixed to progress lines so they can be told apart from other output.
const PROGRESS_MARKER: &str = "vidkeep-progress";

/// Number of stderr lines kept for error categorization.
const STDERR_TAIL: usize = 32;

/// yt-dlp provider configuration.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary.
    pub binary_path: String,
    /// Highest video resolution to request.
    pub max_height: u32,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            max_height: 1080,
        }
    }
}

/// Fetch provider backed by the yt-dlp CLI.
pub struct YtDlpProvider {
    config: YtDlpConfig,
    version: Option<String>,
}

impl YtDlpProvider {
    pub fn new(config: YtDlpConfig) -> Self {
        let version = Self::detect_version(&config.binary_path);
        Self { config, version }
    }

    fn detect_version(path: &str) -> Option<String> {
        std::process::Command::new(path)
            .arg("--version")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.trim().to_string())
    }

    /// Format selector: H.264 video up to the height cap plus AAC audio,
    /// falling back to a single progressive mp4.
    fn format_selector(&self) -> String {
        format!(
            "bestvideo[vcodec^=avc1][height<={h}]+bestaudio[acodec^=mp4a]/best[ext=mp4][height<={h}]/best[ext=mp4]",
            h = self.config.max_height
        )
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-colors".to_string(),
            "-f".to_string(),
            self.format_selector(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{PROGRESS_MARKER} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
            ),
            "-o".to_string(),
            request.output_path.to_string_lossy().into_owned(),
        ];

        if let Some(dir) = &request.thumbnail_dir {
            args.extend([
                "--write-thumbnail".to_string(),
                "--convert-thumbnails".to_string(),
                "jpg".to_string(),
                "-o".to_string(),
                format!(
                    "thumbnail:{}",
                    dir.join(format!("{}.%(ext)s", request.job_id))
                        .to_string_lossy()
                ),
            ]);
        }

        args.push(request.reference.as_str().to_string());
        args
    }

    /// Parse a progress line emitted through the progress template.
    ///
    /// Fields yt-dlp does not know are printed as `NA`; byte counts may be floats.
    pub(crate) fn parse_progress_line(line: &str) -> Option<FetchProgress> {
        let mut fields = line.trim().strip_prefix(PROGRESS_MARKER)?.split_whitespace();

        fn number(field: Option<&str>) -> Option<u64> {
            let value: f64 = field?.parse().ok()?;
            (value.is_finite() && value >= 0.0).then_some(value as u64)
        }

        let downloaded = number(fields.next())?;
        let total = number(fields.next());
        let estimate = number(fields.next());
        let total_bytes = total.or(estimate).filter(|t| *t > 0);

        Some(FetchProgress::new(downloaded, total_bytes))
    }

    /// Map yt-dlp's error output to a failure category.
    pub(crate) fn categorize_error(stderr_tail: &[String], exit: ProcessExit) -> ProviderError {
        let detail = stderr_tail
            .iter()
            .rev()
            .find(|line| line.starts_with("ERROR:"))
            .or_else(|| stderr_tail.iter().rev().find(|line| !line.trim().is_empty()))
            .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
            .unwrap_or_else(|| match exit {
                ProcessExit::Exited(Some(code)) => format!("yt-dlp exited with code {code}"),
                ProcessExit::Exited(None) => "yt-dlp was terminated by a signal".to_string(),
                ProcessExit::Killed => "yt-dlp was killed".to_string(),
                ProcessExit::WaitFailed => "failed to wait for yt-dlp".to_string(),
            });

        let lower = detail.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let code = if has(&[
            "private video",
            "sign in",
            "members-only",
            "confirm your age",
            "age-restricted",
            "not available in your country",
        ]) {
            FailureCode::Restricted
        } else if has(&[
            "requested format is not available",
            "unable to extract",
            "unsupported url",
            "postprocessing",
        ]) {
            FailureCode::Malformed
        } else if has(&[
            "video unavailable",
            "has been removed",
            "does not exist",
            "http error 404",
            "is not available",
        ]) {
            FailureCode::Unavailable
        } else if has(&[
            "timed out",
            "connection",
            "network",
            "http error",
            "temporary failure in name resolution",
            "unable to download",
        ]) {
            FailureCode::Network
        } else if has(&["no space left", "permission denied", "read-only file system"]) {
            FailureCode::Io
        } else {
            FailureCode::Unknown
        };

        ProviderError::failed(code, detail)
    }
}

#[async_trait]
impl FetchProvider for YtDlpProvider {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ProviderError> {
        let args = self.build_args(&request);
        debug!(job_id = %request.job_id, ?args, "Starting yt-dlp");

        let mut command = Command::new(&self.config.binary_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = own_process_group(&mut command)
            .spawn()
            .map_err(|e| ProviderError::failed(FailureCode::Io, format!("failed to spawn yt-dlp: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ProviderError::failed(FailureCode::Io, "failed to capture yt-dlp stdout")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProviderError::failed(FailureCode::Io, "failed to capture yt-dlp stderr")
        })?;

        let exit_rx = spawn_process_waiter(child, cancel.clone());

        let job_id = request.job_id.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job_id = %job_id, "yt-dlp: {}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail)
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match Self::parse_progress_line(&line) {
                        Some(report) => {
                            let _ = progress.try_send(report);
                        }
                        None => debug!(job_id = %request.job_id, "yt-dlp: {}", line),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job_id = %request.job_id, "Error reading yt-dlp stdout: {}", e);
                        break;
                    }
                },
            }
        }

        let exit = exit_rx.await.unwrap_or(ProcessExit::WaitFailed);
        if cancel.is_cancelled() || exit == ProcessExit::Killed {
            stderr_task.abort();
            return Err(ProviderError::Aborted);
        }

        let stderr_tail = stderr_task.await.unwrap_or_default();
        if exit.success() {
            info!(job_id = %request.job_id, "yt-dlp finished");
            Ok(FetchOutcome {
                path: request.output_path,
                content_type: ASSET_CONTENT_TYPE.to_string(),
            })
        } else {
            Err(Self::categorize_error(&stderr_tail, exit))
        }
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MediaReference;
    use rstest::rstest;

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            YtDlpProvider::parse_progress_line("vidkeep-progress 1024 4096 NA"),
            Some(FetchProgress::new(1024, Some(4096)))
        );
        assert_eq!(
            YtDlpProvider::parse_progress_line("vidkeep-progress 1024 NA 8192.5"),
            Some(FetchProgress::new(1024, Some(8192)))
        );
        assert_eq!(
            YtDlpProvider::parse_progress_line("vidkeep-progress 10 NA NA"),
            Some(FetchProgress::new(10, None))
        );
        assert_eq!(
            YtDlpProvider::parse_progress_line("vidkeep-progress NA NA NA"),
            None
        );
        assert_eq!(
            YtDlpProvider::parse_progress_line("[youtube] dQw4w9WgXcQ: Downloading webpage"),
            None
        );
    }

    #[rstest]
    #[case("ERROR: [youtube] abc: Private video. Sign in if you've been granted access", FailureCode::Restricted)]
    #[case("ERROR: [youtube] abc: Sign in to confirm your age", FailureCode::Restricted)]
    #[case("ERROR: [youtube] abc: Video unavailable", FailureCode::Unavailable)]
    #[case("ERROR: [youtube] abc: This video has been removed by the uploader", FailureCode::Unavailable)]
    #[case("ERROR: unable to download video data: <urlopen error timed out>", FailureCode::Network)]
    #[case("ERROR: Unable to download webpage: HTTP Error 503", FailureCode::Network)]
    #[case("ERROR: [Errno 28] No space left on device", FailureCode::Io)]
    #[case("ERROR: [youtube] abc: Requested format is not available", FailureCode::Malformed)]
    #[case("ERROR: something odd happened", FailureCode::Unknown)]
    fn test_categorize_error(#[case] line: &str, #[case] expected: FailureCode) {
        let err = YtDlpProvider::categorize_error(
            &lines(&["[youtube] abc: Downloading webpage", line]),
            ProcessExit::Exited(Some(1)),
        );
        match err {
            ProviderError::Failed { code, detail } => {
                assert_eq!(code, expected);
                assert!(!detail.starts_with("ERROR:"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_categorize_without_output_uses_exit_code() {
        let err = YtDlpProvider::categorize_error(&[], ProcessExit::Exited(Some(2)));
        assert_eq!(
            err,
            ProviderError::failed(FailureCode::Unknown, "yt-dlp exited with code 2")
        );
    }

    #[test]
    fn test_build_args() {
        let provider = YtDlpProvider {
            config: YtDlpConfig {
                binary_path: "yt-dlp".to_string(),
                max_height: 720,
            },
            version: None,
        };
        let reference = MediaReference::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let request = FetchRequest::new(reference, "/data/videos/dQw4w9WgXcQ.mp4")
            .with_thumbnail_dir("/data/thumbnails");

        let args = provider.build_args(&request);
        assert!(args.iter().any(|a| a.contains("[height<=720]")));
        assert!(args.contains(&"/data/videos/dQw4w9WgXcQ.mp4".to_string()));
        assert!(args.contains(&"thumbnail:/data/thumbnails/dQw4w9WgXcQ.%(ext)s".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert!(!provider.is_available());
    }
}
