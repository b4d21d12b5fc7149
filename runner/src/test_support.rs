//! Test-only executors with scripted outcomes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::core::outcome::{Action, ActionReport, StepOutcome};
use crate::core::types::{Finding, Run, RunStatus, Severity};
use crate::delivery::wait_for_terminal;
use crate::driver::DriverConfig;
use crate::executor::{ActionExecutor, ExecutorFactory, RunContext, StepError};
use crate::registry::RunHandle;

/// One scripted response to `ActionExecutor::next`.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Outcome(StepOutcome),
    Error(StepError),
    /// Never returns; exercises the step timeout.
    Hang,
}

impl ScriptedStep {
    pub fn actions(actions: Vec<Action>) -> Self {
        ScriptedStep::Outcome(StepOutcome::Action(ActionReport::new(actions)))
    }

    pub fn done() -> Self {
        ScriptedStep::Outcome(StepOutcome::Done { summary: None })
    }
}

/// Executor that replays a fixed script, then reports done.
///
/// A gated executor waits for one permit per step, letting tests interleave
/// observation with execution deterministically.
pub struct ScriptedExecutor {
    steps: VecDeque<ScriptedStep>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: steps.into(),
            gate: None,
        }
    }

    /// Executor whose steps only run once released through the returned gate.
    pub fn gated(steps: Vec<ScriptedStep>) -> (Self, StepGate) {
        let semaphore = Arc::new(Semaphore::new(0));
        let executor = Self {
            steps: steps.into(),
            gate: Some(Arc::clone(&semaphore)),
        };
        (executor, StepGate { semaphore })
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn next(&mut self, _ctx: &RunContext) -> Result<StepOutcome, StepError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| StepError::new("step gate closed"))?;
            permit.forget();
        }
        match self.steps.pop_front() {
            Some(ScriptedStep::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedStep::Error(err)) => Err(err),
            Some(ScriptedStep::Hang) => std::future::pending().await,
            None => Ok(StepOutcome::Done { summary: None }),
        }
    }
}

/// Releases steps of a gated [`ScriptedExecutor`].
#[derive(Clone)]
pub struct StepGate {
    semaphore: Arc<Semaphore>,
}

impl StepGate {
    pub fn release(&self, steps: usize) {
        self.semaphore.add_permits(steps);
    }
}

/// Factory handing out queued executors in order; falls back to an empty
/// script (immediately done) once the queue is drained.
#[derive(Default)]
pub struct ScriptedFactory {
    queue: Mutex<VecDeque<ScriptedExecutor>>,
}

impl ScriptedFactory {
    pub fn new(executors: Vec<ScriptedExecutor>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(executors.into()),
        })
    }
}

impl ExecutorFactory for ScriptedFactory {
    fn create(&self, _target: &str) -> Box<dyn ActionExecutor> {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Box::new(next.unwrap_or_else(|| ScriptedExecutor::new(Vec::new())))
    }
}

/// Driver limits suitable for tests: short timeout, generous step cap.
pub fn test_driver_config() -> DriverConfig {
    DriverConfig {
        max_steps: 25,
        step_timeout: Duration::from_millis(100),
    }
}

/// The login-bypass finding used across scenarios.
pub fn login_bypass_finding() -> Finding {
    Finding {
        title: "Authentication Bypass via SQL Injection".to_string(),
        vulnerability_type: "SQL Injection".to_string(),
        severity: Severity::High,
        description: "The login form accepted a SQL injection payload as a password.".to_string(),
        element: Some("input[name=\"password\"]".to_string()),
    }
}

/// Wait until the run is terminal, failing the test after `limit`.
pub async fn settle(handle: &RunHandle, limit: Duration) -> Run {
    let run = tokio::time::timeout(limit, wait_for_terminal(handle))
        .await
        .expect("run did not reach a terminal status in time");
    assert!(matches!(run.status, RunStatus::Completed | RunStatus::Failed));
    run
}
