//! Outcome types reported by an action executor for one step.

use serde_json::Value;

use crate::core::types::Finding;

/// One thing the executor did (or observed) during a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Navigated to a page.
    Load { url: String },
    /// Filled a form field.
    Input { field: String, value: String },
    /// Clicked or submitted an element.
    Click { element: String },
    /// Free-form observation worth recording.
    Observe { message: String, data: Option<Value> },
    /// A confirmed issue.
    Finding(Finding),
}

/// Everything a single successful step produced, in the order it happened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    pub actions: Vec<Action>,
}

impl ActionReport {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

/// Tagged outcome of `ActionExecutor::next`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step ran; record what it did and keep going.
    Action(ActionReport),
    /// The executor has nothing left to do; the run completes.
    Done { summary: Option<String> },
    /// The executor cannot continue; the run fails.
    Fatal { reason: String },
}
