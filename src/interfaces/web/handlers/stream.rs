use std::convert::Infallible;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::super::AppState;
use super::error_body;
use crate::core::progress::{SequencedEvent, Subscription};

#[derive(serde::Deserialize)]
pub struct StreamQuery {
    after: Option<u64>,
}

fn event_json(event: &SequencedEvent) -> String {
    serde_json::to_string(&event.event).unwrap_or_else(|_| "{}".to_string())
}

/// `?after=` wins; otherwise an SSE client's `Last-Event-ID` resumes it.
fn resume_point(query: &StreamQuery, headers: &HeaderMap) -> Option<u64> {
    query.after.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

fn unknown_project(project_id: &str) -> Response {
    error_body(
        StatusCode::NOT_FOUND,
        format!("Project '{}' has no progress to follow", project_id),
    )
    .into_response()
}

pub async fn ws_endpoint(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Response {
    match state.service.subscribe(&project_id, query.after).await {
        Ok(Some(subscription)) => ws
            .on_upgrade(move |socket| forward_events(socket, subscription, project_id))
            .into_response(),
        Ok(None) => unknown_project(&project_id),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}

async fn forward_events(mut socket: WebSocket, mut subscription: Subscription, project_id: String) {
    debug!("WebSocket subscriber attached to {}", project_id);
    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                if socket.send(Message::Text(event_json(&event).into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket for {} failed: {}", project_id, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!(
        "WebSocket subscriber for {} left at seq {}",
        project_id,
        subscription.last_seq()
    );
}

pub async fn sse_events_endpoint(
    Path(project_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let after = resume_point(&query, &headers);
    match state.service.subscribe(&project_id, after).await {
        Ok(Some(subscription)) => {
            let stream = subscription.into_stream().map(|event| {
                Ok::<_, Infallible>(
                    Event::default()
                        .id(event.seq.to_string())
                        .event(event.event.event_type())
                        .data(event_json(&event)),
                )
            });
            Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Ok(None) => unknown_project(&project_id),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}
