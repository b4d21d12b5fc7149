//! Per-run control loop.
//!
//! The driver moves a run from `pending` to `running`, asks the executor for
//! one step at a time, records what each step produced, and stops on an
//! explicit done, the step cap, a fatal outcome, a step timeout or a
//! cancellation request. It is the only writer of its run's state and log.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::core::classifier::{
    Record, classify, parse_findings, phase_hint, step_progress, vulnerability_event,
};
use crate::core::outcome::{ActionReport, StepOutcome};
use crate::core::types::{Finding, NewEvent, RunStatus};
use crate::error::Result;
use crate::executor::{ActionExecutor, RunContext};
use crate::registry::RunHandle;

/// Limits applied to every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Steps after which the run completes even if the executor is not done.
    pub max_steps: u32,
    /// Upper bound on a single `ActionExecutor::next` call.
    pub step_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            step_timeout: Duration::from_secs(60),
        }
    }
}

/// Reason why a driver stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverStop {
    /// The executor reported it was done.
    Done,
    /// `max_steps` steps were executed.
    MaxStepsReached { max_steps: u32 },
    /// The executor reported it cannot continue.
    Fatal { reason: String },
    /// A step exceeded the step timeout.
    TimedOut { step: u32, timeout: Duration },
    /// Cancellation was requested.
    Cancelled,
    /// An engine invariant was violated; the run was failed.
    Defect { message: String },
}

/// Summary of a finished driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOutcome {
    pub run_id: String,
    pub steps_executed: u32,
    pub stop: DriverStop,
    pub status: RunStatus,
}

pub struct RunDriver {
    handle: Arc<RunHandle>,
    executor: Box<dyn ActionExecutor>,
    config: DriverConfig,
    steps_executed: u32,
}

impl RunDriver {
    pub fn new(
        handle: Arc<RunHandle>,
        executor: Box<dyn ActionExecutor>,
        config: DriverConfig,
    ) -> Self {
        Self {
            handle,
            executor,
            config,
            steps_executed: 0,
        }
    }

    /// Drive the run to a terminal status.
    #[instrument(skip_all, fields(run_id = %self.handle.id()))]
    pub async fn run(mut self) -> DriverOutcome {
        let stop = match self.drive().await {
            Ok(stop) => stop,
            Err(err) => {
                error!(error = %err, "engine invariant violated while driving run");
                self.abort(&err.to_string());
                DriverStop::Defect {
                    message: err.to_string(),
                }
            }
        };

        let outcome = DriverOutcome {
            run_id: self.handle.id().to_string(),
            steps_executed: self.steps_executed,
            stop,
            status: self.handle.status(),
        };
        info!(
            steps = outcome.steps_executed,
            status = %outcome.status,
            stop = ?outcome.stop,
            "run finished"
        );
        outcome
    }

    async fn drive(&mut self) -> Result<DriverStop> {
        let state = self.handle.state();
        state.transition(RunStatus::Running)?;
        state.set_phase("Initializing")?;

        loop {
            if self.handle.cancel_requested() {
                info!("cancellation observed between steps");
                self.fail(
                    NewEvent::error("Test cancelled by user"),
                    "Cancelled",
                )?;
                return Ok(DriverStop::Cancelled);
            }
            if self.steps_executed >= self.config.max_steps {
                info!(max_steps = self.config.max_steps, "step cap reached");
                self.complete()?;
                return Ok(DriverStop::MaxStepsReached {
                    max_steps: self.config.max_steps,
                });
            }

            self.steps_executed += 1;
            let step = self.steps_executed;
            let ctx = self.context(step);
            debug!(step, "requesting next action");

            let result = tokio::time::timeout(self.config.step_timeout, self.executor.next(&ctx)).await;
            match result {
                Err(_elapsed) => {
                    let timeout = self.config.step_timeout;
                    warn!(step, ?timeout, "step timed out");
                    self.fail(
                        NewEvent::error(format!("Step {step} timed out after {timeout:?}"))
                            .with_data(json!({ "step": step, "timeout_ms": timeout.as_millis() as u64 })),
                        "Failed",
                    )?;
                    return Ok(DriverStop::TimedOut { step, timeout });
                }
                Ok(Err(step_error)) => {
                    warn!(step, error = %step_error, "step failed, continuing");
                    self.handle.log().append(
                        NewEvent::error(format!("Step {step} failed: {step_error}"))
                            .with_detail(step_error.message.clone()),
                    )?;
                }
                Ok(Ok(StepOutcome::Fatal { reason })) => {
                    warn!(step, reason = %reason, "executor cannot continue");
                    self.fail(
                        NewEvent::error(format!("Pentest failed: {reason}")).with_detail(reason.clone()),
                        "Failed",
                    )?;
                    return Ok(DriverStop::Fatal { reason });
                }
                Ok(Ok(StepOutcome::Done { summary })) => {
                    if let Some(summary) = summary {
                        let findings = parse_findings(&summary);
                        self.handle.log().append(NewEvent::info(summary))?;
                        if !findings.is_empty() {
                            debug!(step, count = findings.len(), "findings reported in summary");
                        }
                        for finding in findings {
                            self.record_finding(finding)?;
                        }
                    }
                    self.complete()?;
                    return Ok(DriverStop::Done);
                }
                Ok(Ok(StepOutcome::Action(report))) => self.record(&report, step)?,
            }
        }
    }

    /// Append a step's records in order and advance phase/progress.
    fn record(&self, report: &ActionReport, step: u32) -> Result<()> {
        let state = self.handle.state();
        let log = self.handle.log();

        for record in classify(report) {
            match record {
                Record::Event(event) => {
                    log.append(event)?;
                }
                Record::Finding(finding) => self.record_finding(finding)?,
            }
        }

        let hint = phase_hint(report);
        if let Some(hint) = hint {
            state.set_phase(hint.phase)?;
        }
        let floor = hint.map_or(0, |hint| hint.progress_floor);
        state.set_progress(step_progress(step, self.config.max_steps, floor))?;
        Ok(())
    }

    /// Known findings are dropped without a second vulnerability event.
    fn record_finding(&self, finding: Finding) -> Result<()> {
        let event = vulnerability_event(&finding);
        if self.handle.state().add_finding(finding)? {
            self.handle.log().append(event)?;
        }
        Ok(())
    }

    fn complete(&self) -> Result<()> {
        let state = self.handle.state();
        state.set_phase("Completed")?;
        state.set_progress(100)?;
        state.transition(RunStatus::Completed)
    }

    fn fail(&self, event: NewEvent, phase: &str) -> Result<()> {
        let state = self.handle.state();
        self.handle.log().append(event)?;
        state.set_phase(phase)?;
        state.transition(RunStatus::Failed)
    }

    /// Best-effort move to `failed` after a defect so callers still get a
    /// definitive status.
    fn abort(&self, message: &str) {
        let state = self.handle.state();
        match state.status() {
            RunStatus::Pending => {
                if let Err(err) = state.transition(RunStatus::Running) {
                    error!(error = %err, "could not start run while aborting");
                    return;
                }
            }
            RunStatus::Running => {}
            RunStatus::Completed | RunStatus::Failed => return,
        }
        if let Err(err) = self.fail(NewEvent::error(format!("Internal error: {message}")), "Failed") {
            error!(error = %err, "could not fail run while aborting");
        }
    }

    fn context(&self, step: u32) -> RunContext {
        let run = self.handle.run();
        RunContext {
            run_id: run.id,
            target: run.target,
            step,
            max_steps: self.config.max_steps,
            findings: run.findings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::Action;
    use crate::core::types::{EventType, Finding, Run, Severity};
    use crate::executor::StepError;
    use crate::test_support::{ScriptedExecutor, ScriptedStep};

    fn handle() -> Arc<RunHandle> {
        Arc::new(RunHandle::new(Run::new("run-1", "http://localhost:8080/login")))
    }

    fn config(max_steps: u32) -> DriverConfig {
        DriverConfig {
            max_steps,
            step_timeout: Duration::from_millis(200),
        }
    }

    fn finding() -> Finding {
        Finding {
            title: "Authentication Bypass via SQL Injection".to_string(),
            vulnerability_type: "SQL Injection".to_string(),
            severity: Severity::High,
            description: "bypassed".to_string(),
            element: Some("#password".to_string()),
        }
    }

    fn types(handle: &RunHandle) -> Vec<EventType> {
        handle.log().read_all().iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn recoverable_step_error_does_not_end_run() {
        let handle = handle();
        let executor = ScriptedExecutor::new(vec![
            ScriptedStep::Error(StepError::new("selector #missing not found")),
            ScriptedStep::Outcome(StepOutcome::Action(ActionReport::new(vec![Action::Click {
                element: "#submit".to_string(),
            }]))),
            ScriptedStep::Outcome(StepOutcome::Done { summary: None }),
        ]);

        let outcome = RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        assert_eq!(outcome.stop, DriverStop::Done);
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(handle.status(), RunStatus::Completed);
        assert_eq!(
            types(&handle),
            vec![EventType::Info, EventType::Error, EventType::Click]
        );
        let run = handle.run();
        assert_eq!(run.progress_percent, 100);
        assert_eq!(run.phase.as_deref(), Some("Completed"));
    }

    #[tokio::test]
    async fn fatal_outcome_fails_run_with_error_event() {
        let handle = handle();
        let executor = ScriptedExecutor::new(vec![ScriptedStep::Outcome(StepOutcome::Fatal {
            reason: "no login form found".to_string(),
        })]);

        let outcome = RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        assert_eq!(
            outcome.stop,
            DriverStop::Fatal {
                reason: "no login form found".to_string()
            }
        );
        assert_eq!(handle.status(), RunStatus::Failed);
        let events = handle.log().read_all();
        let last = events.last().expect("event");
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.message, "Pentest failed: no login form found");
    }

    #[tokio::test]
    async fn step_cap_completes_run() {
        let handle = handle();
        let observe = || {
            ScriptedStep::Outcome(StepOutcome::Action(ActionReport::new(vec![Action::Observe {
                message: "looking".to_string(),
                data: None,
            }])))
        };
        let executor = ScriptedExecutor::new(vec![observe(), observe(), observe(), observe()]);

        let outcome = RunDriver::new(Arc::clone(&handle), Box::new(executor), config(2))
            .run()
            .await;

        assert_eq!(outcome.stop, DriverStop::MaxStepsReached { max_steps: 2 });
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(handle.status(), RunStatus::Completed);
        assert_eq!(handle.log().len(), 3);
    }

    #[tokio::test]
    async fn rereported_finding_yields_one_vulnerability_event() {
        let handle = handle();
        let report = || {
            ScriptedStep::Outcome(StepOutcome::Action(ActionReport::new(vec![Action::Finding(
                finding(),
            )])))
        };
        let executor = ScriptedExecutor::new(vec![report(), report()]);

        RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        let vulnerabilities = types(&handle)
            .into_iter()
            .filter(|t| *t == EventType::Vulnerability)
            .count();
        assert_eq!(vulnerabilities, 1);
        assert_eq!(handle.run().findings, vec![finding()]);
    }

    #[tokio::test]
    async fn cancellation_before_first_step_fails_run() {
        let handle = handle();
        handle.request_cancel().expect("cancel");
        let executor = ScriptedExecutor::new(vec![ScriptedStep::Outcome(StepOutcome::Done {
            summary: None,
        })]);

        let outcome = RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        assert_eq!(outcome.stop, DriverStop::Cancelled);
        assert_eq!(outcome.steps_executed, 0);
        assert_eq!(handle.status(), RunStatus::Failed);
        let run = handle.run();
        assert_eq!(run.phase.as_deref(), Some("Cancelled"));
        let events = handle.log().read_all();
        assert_eq!(events.last().map(|e| e.message.as_str()), Some("Test cancelled by user"));
    }

    #[tokio::test]
    async fn done_summary_is_recorded_as_info() {
        let handle = handle();
        let executor = ScriptedExecutor::new(vec![ScriptedStep::Outcome(StepOutcome::Done {
            summary: Some("No vulnerabilities detected".to_string()),
        })]);

        RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        let events = handle.log().read_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].message, "No vulnerabilities detected");
    }

    #[tokio::test]
    async fn findings_listed_in_done_summary_are_recorded() {
        let handle = handle();
        let summary = r##"Testing complete.
[{"severity": "high", "type": "SQL Injection", "title": "Authentication Bypass via SQL Injection", "description": "bypassed", "element": "#password"},
 {"severity": "LOW", "type": "Information Disclosure", "title": "Credentials in page", "description": "hint text"}]"##;
        let executor = ScriptedExecutor::new(vec![
            ScriptedStep::Outcome(StepOutcome::Action(ActionReport::new(vec![Action::Finding(
                finding(),
            )]))),
            ScriptedStep::Outcome(StepOutcome::Done {
                summary: Some(summary.to_string()),
            }),
        ]);

        let outcome = RunDriver::new(Arc::clone(&handle), Box::new(executor), config(10))
            .run()
            .await;

        assert_eq!(outcome.stop, DriverStop::Done);
        assert_eq!(
            types(&handle),
            vec![
                EventType::Info,
                EventType::Vulnerability,
                EventType::Info,
                EventType::Vulnerability,
            ]
        );
        let run = handle.run();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.findings.len(), 2);
        assert_eq!(run.findings[1].severity, Severity::Low);
        assert_eq!(run.findings[1].title, "Credentials in page");
    }

    #[tokio::test]
    async fn driving_a_finished_run_is_reported_as_defect() {
        let handle = handle();
        handle.state().transition(RunStatus::Running).expect("start");
        handle.state().transition(RunStatus::Failed).expect("fail");

        let outcome = RunDriver::new(
            Arc::clone(&handle),
            Box::new(ScriptedExecutor::new(Vec::new())),
            config(10),
        )
        .run()
        .await;

        assert!(matches!(outcome.stop, DriverStop::Defect { .. }));
        assert_eq!(handle.status(), RunStatus::Failed);
        assert_eq!(handle.log().len(), 1);
    }
}
