//! Subscriber-side cursor over a run's event sequence.
//!
//! A cursor is a plain value: the follower loop owns it, feeds every snapshot
//! page through [`ClientCursor::accept`], and persists `last_seq` however it
//! likes to resume after a reconnect or restart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Event, RunStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCursor {
    /// Highest sequence delivered to the subscriber (0 = nothing yet).
    pub last_seq: u64,
    /// Set once a terminal run status has been observed.
    pub done: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("gap in event sequence: expected {expected}, got {found}")]
    Gap { expected: u64, found: u64 },
    #[error("event sequence out of order: {found} after {previous}")]
    OutOfOrder { previous: u64, found: u64 },
}

impl ClientCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after an already-delivered sequence.
    pub fn resume_from(last_seq: u64) -> Self {
        Self {
            last_seq,
            done: false,
        }
    }

    /// Accept a snapshot page and return the events not yet delivered, in order.
    ///
    /// Events at or below `last_seq` are dropped as duplicates. A page that
    /// would skip a sequence or go backwards is rejected as a whole and the
    /// cursor is left unchanged, so the next poll retries from the same point.
    pub fn accept(
        &mut self,
        status: RunStatus,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, CursorError> {
        let mut expected = self.last_seq + 1;
        let mut previous = 0;
        let mut fresh = Vec::new();

        for event in events {
            if event.sequence <= previous {
                return Err(CursorError::OutOfOrder {
                    previous,
                    found: event.sequence,
                });
            }
            previous = event.sequence;

            if event.sequence < expected {
                continue;
            }
            if event.sequence > expected {
                return Err(CursorError::Gap {
                    expected,
                    found: event.sequence,
                });
            }
            expected += 1;
            fresh.push(event);
        }

        if let Some(last) = fresh.last() {
            self.last_seq = last.sequence;
        }
        if status.is_terminal() {
            self.done = true;
        }
        Ok(fresh)
    }
}
