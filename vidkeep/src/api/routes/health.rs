//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;
use crate::database;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

async fn collect_components(state: &AppState) -> Vec<ComponentHealth> {
    let mut components = Vec::new();

    if let Some(pool) = &state.db_pool {
        components.push(match database::ping(pool).await {
            Ok(()) => ComponentHealth::healthy("database"),
            Err(e) => ComponentHealth::unhealthy("database", e.to_string()),
        });
    }

    if let Some(scheduler) = &state.scheduler {
        components.push(if scheduler.is_running() {
            ComponentHealth::healthy("scheduler")
        } else {
            ComponentHealth::unhealthy("scheduler", "worker pool is not running")
        });
    }

    if let Some(gateway) = &state.gateway {
        let mut gateway_health = ComponentHealth::healthy("realtime");
        gateway_health.message = Some(format!("{} connections", gateway.connection_count()));
        components.push(gateway_health);
    }

    components
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let components = collect_components(&state).await;
    let status = if components.iter().all(ComponentHealth::is_healthy) {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        components,
    })
}

/// Readiness check: 200 when every wired component is healthy, 503 otherwise.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let components = collect_components(&state).await;
    if components.iter().all(ComponentHealth::is_healthy) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 3600,
            components: vec![ComponentHealth::healthy("database")],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("database"));
        assert!(!json.contains("message"));
    }

    #[tokio::test]
    async fn test_ready_with_database() {
        let pool = database::init_pool("sqlite::memory:").await.unwrap();
        let app = router().with_state(AppState::new().with_db_pool(pool));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_fails_with_closed_database() {
        let pool = database::init_pool("sqlite::memory:").await.unwrap();
        pool.close().await;
        let app = router().with_state(AppState::new().with_db_pool(pool));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_live() {
        let app = router().with_state(AppState::new());
        let response = app
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
