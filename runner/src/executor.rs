//! Executor abstraction for probing steps.
//!
//! The [`ActionExecutor`] trait decouples the run driver from whatever performs
//! the probing (an HTTP prober, a browser-driving planner, ...). Tests use
//! scripted executors that return predetermined outcomes.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::outcome::StepOutcome;

/// Read-only context handed to the executor for each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub target: String,
    /// 1-based step number.
    pub step: u32,
    pub max_steps: u32,
    /// Findings recorded so far.
    pub findings: usize,
}

/// A single step failed but the run can continue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Performs one probing step per call.
///
/// `next` is the only place a run suspends. Implementations keep their own plan
/// position; the driver bounds each call with the configured step timeout.
#[async_trait]
pub trait ActionExecutor: Send {
    async fn next(&mut self, ctx: &RunContext) -> Result<StepOutcome, StepError>;
}

/// Builds a fresh executor for each new run.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, target: &str) -> Box<dyn ActionExecutor>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&str) -> Box<dyn ActionExecutor> + Send + Sync,
{
    fn create(&self, target: &str) -> Box<dyn ActionExecutor> {
        self(target)
    }
}
