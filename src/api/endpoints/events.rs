//! Event feed: live server-sent events and recent history.

use std::convert::Infallible;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::events::Event;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// `GET /events`: live feed. A subscriber that falls behind is
/// disconnected and may reconnect.
pub async fn stream(
    State(ctx): State<ApiContext>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = ctx.core.events().subscribe();
    tracing::debug!(subscribers = ctx.core.events().subscriber_count(), "Event subscriber joined");

    let feed = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = SseEvent::default()
                        .event(event.kind.as_str())
                        .json_data(&event);
                    match frame {
                        Ok(frame) => return Some((Ok(frame), rx)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Cannot encode event");
                            continue;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber too slow, dropping it");
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(feed).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// `GET /events/history?limit=N`
pub async fn history(
    State(ctx): State<ApiContext>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(ctx.core.events().history(limit)))
}
