use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{projects, runs, stream};

fn build_localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/agent/run", post(runs::start_run_endpoint))
        .route("/agent/{project_id}/cancel", post(runs::cancel_run_endpoint))
        .route("/ws/{project_id}", get(stream::ws_endpoint))
        .route(
            "/api/projects/{project_id}/events",
            get(stream::sse_events_endpoint),
        )
        .route("/project/preview", get(projects::preview_project))
        .route("/project/{project_id}", get(projects::get_project))
        .route(
            "/project/{project_id}/versions",
            get(projects::list_versions),
        )
        .route(
            "/project/{project_id}/versions/{version}",
            get(projects::get_version),
        )
        .route(
            "/project/{project_id}/rollback",
            post(projects::rollback_project),
        )
        .route(
            "/project/{project_id}/messages",
            get(projects::list_messages),
        )
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
