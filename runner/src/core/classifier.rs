//! Deterministic classification of executor outcomes into log records.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::core::outcome::{Action, ActionReport};
use crate::core::types::{EventType, Finding, NewEvent, Severity};

/// One record produced from an action report, in report order.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Append as-is.
    Event(NewEvent),
    /// Register as a finding; append its vulnerability event only if it is new.
    Finding(Finding),
}

/// Map a report to the records the driver appends, preserving action order.
pub fn classify(report: &ActionReport) -> Vec<Record> {
    report
        .actions
        .iter()
        .map(|action| match action {
            Action::Load { url } => Record::Event(
                NewEvent::new(EventType::Load, format!("Loading page: {url}"))
                    .with_data(json!({ "url": url })),
            ),
            Action::Input { field, value } => Record::Event(
                NewEvent::new(EventType::Input, format!("Entering value into {field}"))
                    .with_detail(format!("Field: {field}, Value: {value}"))
                    .with_data(json!({ "field": field, "test_value": value })),
            ),
            Action::Click { element } => Record::Event(
                NewEvent::new(EventType::Click, format!("Clicking {element}"))
                    .with_data(json!({ "element": element })),
            ),
            Action::Observe { message, data } => {
                let event = NewEvent::info(message.clone());
                Record::Event(match data {
                    Some(data) => event.with_data(data.clone()),
                    None => event,
                })
            }
            Action::Finding(finding) => Record::Finding(finding.clone()),
        })
        .collect()
}

/// Event recorded for a newly registered finding. `details.data` carries the
/// finding itself so the event and the finding match by content.
pub fn vulnerability_event(finding: &Finding) -> NewEvent {
    let data = serde_json::to_value(finding).unwrap_or(Value::Null);
    NewEvent::new(
        EventType::Vulnerability,
        format!("Vulnerability detected: {}", finding.title),
    )
    .with_detail(finding.description.clone())
    .with_data(data)
}

/// Phase label and progress floor suggested by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseHint {
    pub phase: &'static str,
    pub progress_floor: u8,
}

/// Heuristic phase for a report: the most advanced activity it contains wins.
pub fn phase_hint(report: &ActionReport) -> Option<PhaseHint> {
    let mut best: Option<PhaseHint> = None;
    for action in &report.actions {
        let hint = match action {
            Action::Load { .. } => PhaseHint {
                phase: "Reconnaissance",
                progress_floor: 15,
            },
            Action::Input { .. } | Action::Click { .. } => PhaseHint {
                phase: "Web Application Testing",
                progress_floor: 50,
            },
            Action::Finding(_) => PhaseHint {
                phase: "Vulnerability Analysis",
                progress_floor: 80,
            },
            Action::Observe { .. } => continue,
        };
        if best.is_none_or(|current| hint.progress_floor > current.progress_floor) {
            best = Some(hint);
        }
    }
    best
}

/// Progress after `steps_done` of `max_steps`, kept below 100 until the run completes.
pub fn step_progress(steps_done: u32, max_steps: u32, floor: u8) -> u8 {
    let by_steps = if max_steps == 0 {
        0
    } else {
        (u64::from(steps_done) * 100 / u64::from(max_steps)).min(95) as u8
    };
    by_steps.max(floor).min(99)
}

/// Extract findings from free-form planner output.
///
/// Looks for the first JSON array and keeps entries that carry `severity`,
/// `type`, `title` and `description`. Unknown severities become `medium`.
pub fn parse_findings(text: &str) -> Vec<Finding> {
    static ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").unwrap());
    let Some(matched) = ARRAY_RE.find(text) else {
        return Vec::new();
    };
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(matched.as_str()) else {
        return Vec::new();
    };

    items.iter().filter_map(finding_from_value).collect()
}

fn finding_from_value(value: &Value) -> Option<Finding> {
    let field = |key: &str| value.get(key).and_then(Value::as_str);
    Some(Finding {
        severity: Severity::parse_lenient(field("severity")?),
        vulnerability_type: field("type")?.to_string(),
        title: field("title")?.to_string(),
        description: field("description")?.to_string(),
        element: field("element").map(str::to_string),
    })
}
