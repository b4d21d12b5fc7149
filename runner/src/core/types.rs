//! Shared deterministic types for the run engine.
//!
//! These types are the wire contract consumed by dashboards and followers, so
//! field names are serialized exactly as clients expect them (`sequence`,
//! `progressPercent`, `vulnerabilityType`, ...). They carry no I/O.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Lifecycle status of a run.
///
/// The vocabulary is closed: any other status string is rejected on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(EngineError::Validation(format!("unknown run status '{other}'"))),
        }
    }
}

/// Kind of an event recorded in a run's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Load,
    Input,
    Click,
    Vulnerability,
    Error,
    Info,
}

/// Optional structured payload attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An event that has been appended to a log and assigned its sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 1-based position in the run's log. The only ordering key.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
    /// Informational only; never used for ordering or dedup.
    pub timestamp: DateTime<Utc>,
}

/// An event before it is appended (no sequence yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub message: String,
    pub details: Option<EventDetails>,
}

impl NewEvent {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventType::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventType::Error, message)
    }

    /// Set `details.message`.
    pub fn with_detail(mut self, message: impl Into<String>) -> Self {
        self.details.get_or_insert_with(EventDetails::default).message = Some(message.into());
        self
    }

    /// Set `details.data`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.details.get_or_insert_with(EventDetails::default).data = Some(data);
        self
    }
}

/// Severity of a finding, always `high`, `medium` or `low` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Parse planner-reported severity, falling back to `medium` for unknown labels.
    pub fn parse_lenient(raw: &str) -> Severity {
        raw.parse().unwrap_or(Severity::Medium)
    }
}

impl FromStr for Severity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            _ => Err(EngineError::Validation(format!("unknown severity '{s}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One confirmed issue surfaced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub title: String,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    /// Element reference used by dashboards to highlight the affected field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl Finding {
    /// Identity used to suppress re-reported findings.
    pub fn dedup_key(&self) -> (&str, &str, Option<&str>) {
        (
            self.title.as_str(),
            self.vulnerability_type.as_str(),
            self.element.as_deref(),
        )
    }
}

/// Metadata for one test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub target: String,
    pub status: RunStatus,
    #[serde(default)]
    pub phase: Option<String>,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl Run {
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            status: RunStatus::Pending,
            phase: None,
            progress_percent: 0,
            created_at: Utc::now(),
            finished_at: None,
            findings: Vec::new(),
        }
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        SeverityCounts::from_findings(&self.findings)
    }
}

/// Per-severity finding counts used by run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }
}
