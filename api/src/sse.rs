//! Server-Sent Events stream of a run's log.
//!
//! Frames:
//! - `connected` once, with the test id and the resume cursor
//! - `event` per log entry, `id` set to its sequence
//! - `test_completed` once the run is terminal and fully delivered
//!
//! Reconnecting clients resume with the standard `Last-Event-ID` header (or
//! `?after=`), so no event is delivered twice or skipped.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use pentest_runner::delivery::{StreamItem, subscribe};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub after: Option<u64>,
}

/// GET /tests/{id}/events
pub async fn events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let handle = state
        .registry
        .handle(&id)
        .ok_or_else(ApiError::test_not_found)?;
    let after = resume_cursor(&headers, query.after)?;
    debug!(test_id = %id, after, "event stream opened");

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "test_id": id, "after": after }).to_string()));

        let mut items = Box::pin(subscribe(handle, after));
        while let Some(item) = items.next().await {
            match item {
                StreamItem::Event(event) => match Event::default()
                    .event("event")
                    .id(event.sequence.to_string())
                    .json_data(&event)
                {
                    Ok(frame) => yield Ok(frame),
                    Err(err) => {
                        warn!(test_id = %id, sequence = event.sequence, error = %err, "event not serializable");
                    }
                },
                StreamItem::Finished { status } => {
                    yield Ok(Event::default()
                        .event("test_completed")
                        .data(json!({ "test_id": id, "status": status }).to_string()));
                }
            }
        }
        debug!(test_id = %id, "event stream closed");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping")))
}

/// `Last-Event-ID` wins over `?after=`; neither means the full log.
fn resume_cursor(headers: &HeaderMap, after: Option<u64>) -> Result<u64, ApiError> {
    let Some(raw) = headers.get(LAST_EVENT_ID) else {
        return Ok(after.unwrap_or(0));
    };
    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or_else(|| ApiError::BadRequest("Last-Event-ID must be an event sequence".to_string()))
}
