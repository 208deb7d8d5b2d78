//! HTTP handlers for the queue control surface.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::PageStatus;
use crate::repository::StoreError;
use crate::services::{Priority, ProgressSnapshot, QueueEvent};

use super::AppState;

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: StoreError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
}

/// GET /api/ocr/progress
pub async fn ocr_progress(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.queue.progress())
}

/// POST /api/ocr/pause
pub async fn ocr_pause(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    state.queue.pause();
    Json(state.queue.progress())
}

/// POST /api/ocr/resume
pub async fn ocr_resume(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    state.queue.resume();
    Json(state.queue.progress())
}

#[derive(Debug, Deserialize)]
pub struct EnqueueParams {
    pub priority: Option<Priority>,
}

/// POST /api/pages/:page_id/ocr
///
/// Queues a page for recognition. Pages already completed or mid-flight
/// are rejected; failed pages are re-enqueued.
pub async fn enqueue_page(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
    Query(params): Query<EnqueueParams>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .store
        .get_page(&page_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("page"))?;

    if !page.ocr_status.is_enqueueable() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "page is not enqueueable",
                "status": page.ocr_status.as_str(),
            })),
        ));
    }

    let priority = params.priority.unwrap_or(Priority::Normal);
    let queued = state.queue.enqueue(&page, priority);
    Ok(Json(json!({ "queued": queued })))
}

/// POST /api/pages/:page_id/prioritize
///
/// Moves an already-queued page ahead of all normal-priority work; used
/// when the reader is viewing a page whose recognition has not started.
pub async fn prioritize_page(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Json<Value> {
    let promoted = state.queue.prioritize(&page_id);
    Json(json!({ "promoted": promoted }))
}

/// GET /api/pages/:page_id/text
pub async fn page_text_blocks(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .store
        .get_page(&page_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("page"))?;
    let blocks = state
        .store
        .list_text_blocks(&page_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "page_id": page.id,
        "status": page.ocr_status.as_str(),
        "image_size": page.image_size,
        "text_blocks": blocks,
    })))
}

/// GET /api/status
pub async fn api_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let statuses = [
        PageStatus::Pending,
        PageStatus::Processing,
        PageStatus::Completed,
        PageStatus::Failed,
    ];
    let counts = state
        .store
        .count_by_status(&statuses)
        .await
        .map_err(internal_error)?;

    let mut body = serde_json::Map::new();
    for status in statuses {
        let count = counts.get(&status).copied().unwrap_or(0);
        body.insert(status.as_str().to_string(), json!(count));
    }
    Ok(Json(Value::Object(body)))
}

/// GET /api/ocr/completion
pub async fn latest_completion(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .latest_completion_record()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "record": record })))
}

/// POST /api/ocr/completion/:record_id/dismiss
pub async fn dismiss_completion(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dismissed = state
        .store
        .dismiss_completion_record(&record_id)
        .await
        .map_err(internal_error)?;
    if dismissed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("completion record"))
    }
}

/// GET /api/ocr/events
///
/// Server-sent event feed of queue progress. Subscribers receive the
/// current snapshot immediately, then every subsequent transition in
/// order.
pub async fn ocr_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (snapshot, rx) = state.queue.subscribe();

    let initial = stream::iter(vec![Ok(sse_event(&QueueEvent::Progress(snapshot)))]);
    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(sse_event(&event)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Snapshots are full-state views, so skipping stale
                    // ones loses nothing.
                    debug!(skipped, "SSE subscriber lagged behind queue events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::default())
}

fn sse_event(event: &QueueEvent) -> Event {
    let (name, payload) = match event {
        QueueEvent::Progress(snapshot) => ("progress", serde_json::to_string(snapshot)),
        QueueEvent::Completion(record) => ("completion", serde_json::to_string(record)),
    };
    match payload {
        Ok(data) => Event::default().event(name).data(data),
        Err(_) => Event::default().event(name).data("{}"),
    }
}
