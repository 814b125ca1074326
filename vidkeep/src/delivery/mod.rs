//! Content delivery.
//!
//! Serves finalized assets with HTTP range semantics. Only COMPLETE jobs are
//! visible; anything else is reported as not found so partial files never
//! leak out.

mod range;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use range::{ByteRange, RangeError, parse_range};

use crate::config::DEFAULT_STREAM_CHUNK_SIZE;
use crate::domain::{JobId, JobState};
use crate::scheduler::JobRegistry;
use crate::store::{AssetStore, AssetStream};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("asset {0} not found")]
    NotFound(JobId),

    #[error("range not satisfiable for asset of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error(transparent)]
    Store(#[from] crate::Error),
}

/// A resolved response body.
pub struct Delivery {
    /// Total asset size.
    pub size: u64,
    /// Served range; `None` for a full response.
    pub range: Option<ByteRange>,
    pub content_type: String,
    pub body: AssetStream,
}

impl Delivery {
    /// Number of bytes in the body.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.size, |r| r.length())
    }
}

/// Streams completed assets.
pub struct ContentDelivery {
    registry: Arc<JobRegistry>,
    store: Arc<AssetStore>,
    chunk_size: usize,
}

impl ContentDelivery {
    pub fn new(registry: Arc<JobRegistry>, store: Arc<AssetStore>) -> Self {
        Self {
            registry,
            store,
            chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolve a request for an asset, honoring an optional `Range` header.
    ///
    /// A malformed header is ignored and the full asset is served.
    pub async fn get(
        &self,
        id: &JobId,
        range_header: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        let asset = self
            .registry
            .get(id)
            .filter(|job| job.state == JobState::Complete)
            .and_then(|job| job.asset)
            .ok_or_else(|| DeliveryError::NotFound(id.clone()))?;

        let (file, size) = match self.store.open(&asset.path).await {
            Ok(opened) => opened,
            Err(e) if e.is_not_found() => return Err(DeliveryError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };

        let range = match range_header.map(|header| parse_range(header, size)) {
            None => None,
            Some(Ok(range)) => Some(range),
            Some(Err(RangeError::Malformed)) => {
                debug!(job_id = %id, header = ?range_header, "Ignoring malformed range header");
                None
            }
            Some(Err(RangeError::Unsatisfiable)) => {
                return Err(DeliveryError::RangeNotSatisfiable { size });
            }
        };

        let (start, len) = range.map_or((0, size), |r| (r.start, r.length()));
        let body = AssetStore::stream_range(file, start, len, self.chunk_size)
            .await
            .map_err(|e| crate::Error::io_path("seeking asset", &asset.path, e))?;

        Ok(Delivery {
            size,
            range,
            content_type: asset.content_type,
            body,
        })
    }
}
