use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::{error_body, run_error_response};

#[derive(serde::Deserialize)]
pub struct PreviewQuery {
    id: String,
}

#[derive(serde::Deserialize)]
pub struct RollbackRequest {
    version: u64,
}

#[derive(serde::Deserialize)]
pub struct MessagesQuery {
    after: Option<u64>,
}

async fn snapshot_response(state: &AppState, project_id: &str, version: Option<u64>) -> Response {
    match state.service.snapshot(project_id, version).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            match version {
                Some(v) => format!("Project '{}' has no version {}", project_id, v),
                None => format!("Project '{}' not found", project_id),
            },
        )
        .into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}

pub async fn get_project(Path(project_id): Path<String>, State(state): State<AppState>) -> Response {
    snapshot_response(&state, &project_id, None).await
}

pub async fn preview_project(Query(query): Query<PreviewQuery>, State(state): State<AppState>) -> Response {
    snapshot_response(&state, &query.id, None).await
}

pub async fn get_version(
    Path((project_id, version)): Path<(String, u64)>,
    State(state): State<AppState>,
) -> Response {
    snapshot_response(&state, &project_id, Some(version)).await
}

pub async fn list_versions(Path(project_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.service.store().list_versions(&project_id).await {
        Ok(versions) => Json(serde_json::json!({
            "projectId": project_id,
            "versions": versions,
        }))
        .into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}

pub async fn rollback_project(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RollbackRequest>,
) -> Response {
    match state.service.rollback(&project_id, payload.version).await {
        Ok(committed) => Json(serde_json::json!({
            "success": true,
            "projectId": project_id,
            "version": committed.version,
            "restoredFrom": payload.version,
        }))
        .into_response(),
        Err(e) => run_error_response(&e).into_response(),
    }
}

pub async fn list_messages(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    match state.service.store().list_messages(&project_id, query.after).await {
        Ok(messages) => Json(serde_json::json!({
            "projectId": project_id,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}
