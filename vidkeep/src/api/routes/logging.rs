//! Logging API routes.
//!
//! View and change the log filter at runtime.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

/// Create the logging router.
pub fn router() -> Router<AppState> {
    Router::new().route("/filter", get(get_log_filter).put(update_log_filter))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

fn response(filter: String) -> LoggingConfigResponse {
    let available_modules = available_modules()
        .into_iter()
        .map(|(name, desc)| ModuleInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();
    LoggingConfigResponse {
        filter,
        available_modules,
    }
}

async fn get_log_filter(State(state): State<AppState>) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    Ok(Json(response(config.get_filter())))
}

/// Replace the active filter; an invalid directive is rejected with 422.
async fn update_log_filter(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    config.set_filter(&request.filter)?;
    Ok(Json(response(config.get_filter())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_deserialize() {
        let json = r#"{"filter": "vidkeep=debug"}"#;
        let request: UpdateLogFilterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.filter, "vidkeep=debug");
    }

    #[test]
    fn test_response_lists_modules() {
        let json = serde_json::to_string(&response("vidkeep=info".to_string())).unwrap();
        assert!(json.contains("vidkeep=info"));
        assert!(json.contains("tower_http"));
    }
}
