//! HTTP route handlers for the test API.

use std::str::FromStr;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::get;
use pentest_runner::core::types::RunStatus;
use pentest_runner::delivery::snapshot;
use pentest_runner::error::EngineError;
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::sse;
use crate::state::AppState;
use crate::views::{CreateTest, CreatedTest, Message, TestDetail, TestSummary};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tests", get(list_tests).post(create_test))
        .route("/tests/{id}", get(get_test).delete(cancel_test))
        .route("/tests/{id}/events", get(sse::events_handler))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /tests - register a run and start probing in the background.
async fn create_test(
    State(state): State<AppState>,
    payload: Result<Json<CreateTest>, JsonRejection>,
) -> Result<Json<CreatedTest>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let url = body
        .url
        .ok_or_else(|| ApiError::BadRequest("url is required".to_string()))?;

    let run = state.registry.create(&url)?;
    info!(test_id = %run.id, target = %run.target, "test created");
    Ok(Json(CreatedTest {
        test_id: run.id,
        status: run.status,
        url: run.target,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

/// GET /tests - summaries, newest first, optionally filtered by status.
async fn list_tests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TestSummary>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(RunStatus::from_str)
        .transpose()?;

    let summaries = state
        .registry
        .handles()
        .iter()
        .rev()
        .map(|handle| (handle.run(), handle.log().len()))
        .filter(|(run, _)| status.is_none_or(|wanted| run.status == wanted))
        .map(|(run, event_count)| TestSummary::new(run, event_count))
        .collect();
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
struct DetailQuery {
    after: Option<u64>,
}

/// GET /tests/{id} - metadata, findings, and events after `?after=` (default 0).
async fn get_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<TestDetail>, ApiError> {
    let handle = state
        .registry
        .handle(&id)
        .ok_or_else(ApiError::test_not_found)?;
    Ok(Json(snapshot(&handle, query.after.unwrap_or(0)).into()))
}

/// DELETE /tests/{id} - request cancellation of a pending or running test.
async fn cancel_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    match state.registry.cancel(&id) {
        Ok(()) => Ok(Json(Message {
            message: format!("Test {id} cancellation requested"),
        })),
        Err(EngineError::InvalidState(_)) => Err(ApiError::Conflict(
            "Cannot cancel completed test".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}
