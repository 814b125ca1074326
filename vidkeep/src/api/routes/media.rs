//! Thumbnail route.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::services::ServeFile;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::ThumbnailQuery;
use crate::api::server::AppState;
use crate::domain::JobId;

const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";
const PLACEHOLDER_CACHE_CONTROL: &str = "public, max-age=3600";

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180"><rect width="320" height="180" fill="#2b2b2b"/><polygon points="140,65 140,115 185,90" fill="#8a8a8a"/></svg>"##;

/// Create the thumbnail router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(get_thumbnail))
}

/// Serve the job's thumbnail, or a placeholder when `fallback` is set.
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> ApiResult<Response> {
    let (scheduler, store) = match (&state.scheduler, &state.store) {
        (Some(scheduler), Some(store)) => (scheduler, store),
        _ => return Err(ApiError::service_unavailable("Asset store not available")),
    };

    let id = JobId::parse(&id)?;
    scheduler.get(&id)?;

    let path = store.thumbnail_path(&id);
    let exists = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    if exists {
        let req = Request::builder()
            .body(Body::empty())
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let mut response = ServeFile::new(path)
            .try_call(req)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to serve thumbnail: {}", e)))?
            .into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(THUMBNAIL_CACHE_CONTROL),
        );
        return Ok(response);
    }

    if query.fallback {
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, PLACEHOLDER_CACHE_CONTROL),
            ],
            PLACEHOLDER_SVG,
        )
            .into_response());
    }

    Err(ApiError::not_found(format!("Thumbnail for '{}' not found", id)))
}
