//! Range streaming of completed assets.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
    routing::get,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::delivery::{Delivery, DeliveryError};
use crate::domain::JobId;

/// Create the stream router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(stream_asset))
}

/// Serve a completed asset, honoring `Range: bytes=...`.
async fn stream_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let delivery = state
        .delivery
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Content delivery not available"))?;
    let id = JobId::parse(&id)?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    match delivery.get(&id, range).await {
        Ok(delivery) => build_response(delivery),
        Err(DeliveryError::NotFound(id)) => {
            Err(ApiError::not_found(format!("Asset '{}' not found", id)))
        }
        Err(DeliveryError::RangeNotSatisfiable { size }) => {
            Err(ApiError::range_not_satisfiable(size))
        }
        Err(DeliveryError::Store(e)) => Err(e.into()),
    }
}

fn build_response(delivery: Delivery) -> ApiResult<Response> {
    let content_type = HeaderValue::from_str(&delivery.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, delivery.content_length());

    builder = match delivery.range {
        Some(range) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range(delivery.size)),
        None => builder.status(StatusCode::OK),
    };

    builder
        .body(Body::from_stream(delivery.body))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}
