//! Run lifecycle invariants.
//!
//! Status only moves forward along `pending -> running -> {completed | failed}`.

use crate::core::types::RunStatus;
use crate::error::{EngineError, Result};

/// Validate a requested status edge.
pub fn check_transition(from: RunStatus, to: RunStatus) -> Result<()> {
    match (from, to) {
        (RunStatus::Pending, RunStatus::Running)
        | (RunStatus::Running, RunStatus::Completed)
        | (RunStatus::Running, RunStatus::Failed) => Ok(()),
        _ => Err(EngineError::IllegalTransition {
            from,
            attempted: format!("-> {to}"),
        }),
    }
}

/// Validate that a running-only mutation (phase, progress, findings) is allowed.
pub fn require_running(status: RunStatus, operation: &str) -> Result<()> {
    if status == RunStatus::Running {
        return Ok(());
    }
    Err(EngineError::IllegalTransition {
        from: status,
        attempted: operation.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RunStatus; 4] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Completed,
        RunStatus::Failed,
    ];

    #[test]
    fn only_forward_edges_are_allowed() {
        let mut allowed = Vec::new();
        for from in ALL {
            for to in ALL {
                if check_transition(from, to).is_ok() {
                    allowed.push((from, to));
                }
            }
        }
        assert_eq!(
            allowed,
            vec![
                (RunStatus::Pending, RunStatus::Running),
                (RunStatus::Running, RunStatus::Completed),
                (RunStatus::Running, RunStatus::Failed),
            ]
        );
    }

    /// Pending runs must pass through running before reaching a terminal status.
    #[test]
    fn pending_cannot_skip_running() {
        let err = check_transition(RunStatus::Pending, RunStatus::Completed).unwrap_err();
        assert_eq!(err.to_string(), "illegal transition from pending: -> completed");
    }

    #[test]
    fn running_only_mutations_reject_other_statuses() {
        assert!(require_running(RunStatus::Running, "set phase").is_ok());
        let err = require_running(RunStatus::Completed, "set phase").unwrap_err();
        assert!(matches!(
            err,
            EngineError::IllegalTransition {
                from: RunStatus::Completed,
                ..
            }
        ));
    }
}
