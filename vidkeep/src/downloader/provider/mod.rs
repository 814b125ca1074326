//! Fetch providers.
//!
//! A provider turns a media reference into a local file, reporting byte
//! progress along the way and stopping when its cancellation token fires.

mod process;
mod traits;
mod ytdlp;

pub use process::{ProcessExit, spawn_process_waiter};
pub use traits::{
    FetchOutcome, FetchProgress, FetchProvider, FetchRequest, ProgressSender, ProviderError,
};
pub use ytdlp::{YtDlpConfig, YtDlpProvider};

#[cfg(test)]
pub use traits::MockFetchProvider;
