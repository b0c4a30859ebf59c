pub mod projects;
pub mod runs;
pub mod stream;

use axum::{Json, http::StatusCode};

use crate::core::error::RunError;

pub(crate) fn run_error_status(err: &RunError) -> StatusCode {
    match err {
        RunError::Concurrency(_) => StatusCode::CONFLICT,
        RunError::Validation(_) => StatusCode::BAD_REQUEST,
        RunError::Cancelled => StatusCode::CONFLICT,
        RunError::Generation(_) | RunError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
}

pub(crate) fn run_error_response(err: &RunError) -> (StatusCode, Json<serde_json::Value>) {
    error_body(run_error_status(err), err.to_string())
}
