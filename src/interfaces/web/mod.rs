mod handlers;
mod router;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::service::ForgeService;

pub use router::build_api_router;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ForgeService>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub port: u16,
}

/// Bind and serve the API until the process exits.
pub async fn serve(state: AppState, host: &str) -> Result<()> {
    let addr = format!("{}:{}", host, state.port);
    let app = build_api_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API Server running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}
