//! Downloader module.
//!
//! - `provider`: fetch providers (yt-dlp) behind the [`FetchProvider`] trait
//! - `throttle`: collapses raw byte progress into monotonic percent figures
//! - `worker`: runs a single job episode from PENDING to a terminal state

pub mod provider;
pub mod throttle;
pub mod worker;

pub use provider::{
    FetchOutcome, FetchProgress, FetchProvider, FetchRequest, ProgressSender, ProviderError,
    YtDlpConfig, YtDlpProvider,
};
pub use throttle::{ProgressThrottle, ProgressTick, percent_of};
pub use worker::{DownloadWorker, WorkerConfig};

#[cfg(test)]
pub use provider::MockFetchProvider;
