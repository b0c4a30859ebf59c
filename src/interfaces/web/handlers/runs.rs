use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::super::AppState;
use super::{error_body, run_error_response};
use crate::core::service::RunRequest;

pub async fn start_run_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let request: RunRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            return error_body(StatusCode::BAD_REQUEST, format!("Invalid run request: {}", e))
                .into_response();
        }
    };
    match state.service.start_run(request) {
        Ok(started) => Json(started).into_response(),
        Err(e) => {
            info!("Run request rejected: {}", e);
            run_error_response(&e).into_response()
        }
    }
}

pub async fn cancel_run_endpoint(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.service.cancel(&project_id) {
        Some(run_id) => Json(serde_json::json!({
            "success": true,
            "projectId": project_id,
            "runId": run_id,
        }))
        .into_response(),
        None => error_body(
            StatusCode::NOT_FOUND,
            format!("No active run for project '{}'", project_id),
        )
        .into_response(),
    }
}
