//! JSON bodies exchanged over the API.

use chrono::{DateTime, Utc};
use pentest_runner::core::types::{Event, Finding, Run, RunStatus, SeverityCounts};
use pentest_runner::delivery::Snapshot;
use serde::{Deserialize, Serialize};

/// `POST /tests` body. `url` is optional so a missing field maps to a 400
/// with a readable message instead of a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct CreateTest {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedTest {
    pub test_id: String,
    pub status: RunStatus,
    pub url: String,
}

/// Entry of `GET /tests`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub id: String,
    pub target: String,
    pub status: RunStatus,
    pub phase: Option<String>,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub event_count: u64,
    pub severity_counts: SeverityCounts,
}

impl TestSummary {
    pub fn new(run: Run, event_count: u64) -> Self {
        let severity_counts = run.severity_counts();
        Self {
            id: run.id,
            target: run.target,
            status: run.status,
            phase: run.phase,
            progress_percent: run.progress_percent,
            created_at: run.created_at,
            finished_at: run.finished_at,
            event_count,
            severity_counts,
        }
    }
}

/// `GET /tests/{id}`: run metadata, findings as `results`, and the events
/// after the request cursor.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetail {
    pub id: String,
    pub target: String,
    pub status: RunStatus,
    pub phase: Option<String>,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<Finding>,
    pub events: Vec<Event>,
    pub cursor: u64,
}

impl From<Snapshot> for TestDetail {
    fn from(snapshot: Snapshot) -> Self {
        let Snapshot {
            run,
            events,
            cursor,
        } = snapshot;
        Self {
            id: run.id,
            target: run.target,
            status: run.status,
            phase: run.phase,
            progress_percent: run.progress_percent,
            created_at: run.created_at,
            finished_at: run.finished_at,
            results: run.findings,
            events,
            cursor,
        }
    }
}

impl From<TestDetail> for Snapshot {
    fn from(detail: TestDetail) -> Self {
        Snapshot {
            run: Run {
                id: detail.id,
                target: detail.target,
                status: detail.status,
                phase: detail.phase,
                progress_percent: detail.progress_percent,
                created_at: detail.created_at,
                finished_at: detail.finished_at,
                findings: detail.results,
            },
            events: detail.events,
            cursor: detail.cursor,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}
