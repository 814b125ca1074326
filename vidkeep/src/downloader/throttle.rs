//! Progress throttling.
//!
//! Providers may report byte counts many times per second. The worker feeds
//! every report into a [`ProgressThrottle`] and drains it once per tick, so at
//! most one progress figure per job is published per interval.

use super::provider::FetchProgress;

/// Integer percent of `downloaded` out of `total`, floored and capped at 100.
///
/// Returns `None` when the total is unknown or zero.
pub fn percent_of(downloaded: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let percent = (downloaded as u128 * 100) / total as u128;
    Some(percent.min(100) as u8)
}

/// A progress figure due for publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTick {
    pub percent: u8,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Collapses provider reports into at most one monotonic figure per tick.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    latest: Option<FetchProgress>,
    published: Option<u8>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a provider report; only the most recent one is kept.
    pub fn observe(&mut self, progress: FetchProgress) {
        self.latest = Some(progress);
    }

    /// Take the figure to publish on this tick, if any.
    ///
    /// Reports without a known total are withheld. The percent never goes
    /// below what was already published, even if the provider restarts its
    /// count (for example when moving from the video to the audio stream).
    pub fn take_due(&mut self) -> Option<ProgressTick> {
        let latest = self.latest.take()?;
        let computed = percent_of(latest.downloaded_bytes, latest.total_bytes)?;
        let percent = self.published.map_or(computed, |p| p.max(computed));
        self.published = Some(percent);

        Some(ProgressTick {
            percent,
            downloaded_bytes: latest.downloaded_bytes,
            total_bytes: latest.total_bytes,
        })
    }

    /// Last percent handed out.
    pub fn published(&self) -> Option<u8> {
        self.published
    }
}
