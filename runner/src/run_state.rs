//! Lifecycle state machine and metadata for one run.
//!
//! The driver is the only writer; everything else reads [`RunState::snapshot`].
//! Transitions are recorded in the run's [`EventLog`]: entering `running`
//! appends the start event, and entering a terminal status seals the log
//! while the status lock is held, so a reader that sees a terminal status is
//! guaranteed the log it reads afterwards is complete.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::core::lifecycle::{check_transition, require_running};
use crate::core::types::{Finding, NewEvent, Run, RunStatus};
use crate::error::Result;
use crate::event_log::EventLog;

#[derive(Debug)]
pub struct RunState {
    run: RwLock<Run>,
    log: Arc<EventLog>,
}

impl RunState {
    pub fn new(run: Run, log: Arc<EventLog>) -> Self {
        Self {
            run: RwLock::new(run),
            log,
        }
    }

    /// Copy of the current run metadata.
    pub fn snapshot(&self) -> Run {
        self.run
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> RunStatus {
        self.run.read().unwrap_or_else(PoisonError::into_inner).status
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Move to `to`, failing with `IllegalTransition` for any edge outside
    /// `pending -> running -> {completed | failed}`.
    pub fn transition(&self, to: RunStatus) -> Result<()> {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        check_transition(run.status, to)?;

        if to == RunStatus::Running {
            self.log.append(
                NewEvent::info("Pentest started").with_data(json!({ "url": run.target })),
            )?;
        }

        info!(run_id = %run.id, from = %run.status, to = %to, "run status changed");
        run.status = to;
        if to.is_terminal() {
            run.finished_at = Some(Utc::now());
            self.log.seal();
        }
        Ok(())
    }

    pub fn set_phase(&self, phase: impl Into<String>) -> Result<()> {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        require_running(run.status, "set phase")?;
        run.phase = Some(phase.into());
        Ok(())
    }

    /// Raise progress to `percent` (clamped to 100). Lower values are ignored
    /// so progress never decreases.
    pub fn set_progress(&self, percent: u8) -> Result<()> {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        require_running(run.status, "set progress")?;
        run.progress_percent = run.progress_percent.max(percent.min(100));
        Ok(())
    }

    /// Record a finding. Returns `false` when an identical
    /// `(title, vulnerabilityType, element)` finding already exists.
    pub fn add_finding(&self, finding: Finding) -> Result<bool> {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        require_running(run.status, "add finding")?;
        if run
            .findings
            .iter()
            .any(|existing| existing.dedup_key() == finding.dedup_key())
        {
            debug!(run_id = %run.id, title = %finding.title, "duplicate finding suppressed");
            return Ok(false);
        }
        run.findings.push(finding);
        Ok(true)
    }
}
