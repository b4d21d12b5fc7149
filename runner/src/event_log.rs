//! Append-only, strictly ordered event log for one run.
//!
//! The log has a single writer (the run's driver) and any number of readers.
//! An event is constructed and sequenced under the write lock, so readers only
//! ever observe a complete prefix of the log. Every append and the final seal
//! publish a [`LogHead`] on a watch channel; stream subscribers wait on it
//! instead of polling.

use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::core::types::{Event, NewEvent};
use crate::error::{EngineError, Result};

/// Latest published position of a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogHead {
    /// Sequence of the newest event (0 when empty).
    pub last_sequence: u64,
    /// No event will ever be appended again.
    pub sealed: bool,
}

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<Event>,
    sealed: bool,
}

#[derive(Debug)]
pub struct EventLog {
    inner: RwLock<LogInner>,
    head: watch::Sender<LogHead>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        let (head, _) = watch::channel(LogHead::default());
        Self {
            inner: RwLock::new(LogInner::default()),
            head,
        }
    }

    /// Append an event, assigning the next sequence number.
    ///
    /// Fails with `InvalidState` once the log is sealed.
    pub fn append(&self, event: NewEvent) -> Result<u64> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.sealed {
            return Err(EngineError::InvalidState(format!(
                "cannot append '{}' to a finished run",
                event.message
            )));
        }
        let sequence = inner.events.len() as u64 + 1;
        debug!(sequence, event_type = ?event.event_type, "appending event");
        inner.events.push(Event {
            sequence,
            event_type: event.event_type,
            message: event.message,
            details: event.details,
            timestamp: Utc::now(),
        });
        drop(inner);

        self.head.send_modify(|head| head.last_sequence = sequence);
        Ok(sequence)
    }

    /// All events with `sequence > after`, ascending. Empty if none yet.
    pub fn read_from(&self, after: u64) -> Vec<Event> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        // Sequences are 1-based and gapless, so `after` is also the index of the first match.
        let start = usize::try_from(after).unwrap_or(usize::MAX);
        inner.events.get(start..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    pub fn read_all(&self) -> Vec<Event> {
        self.read_from(0)
    }

    pub fn len(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.events.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.head.borrow().sealed
    }

    /// Refuse further appends. Idempotent.
    pub(crate) fn seal(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sealed = true;
        drop(inner);
        self.head.send_modify(|head| head.sealed = true);
    }

    /// Receiver notified on every append and on seal.
    pub fn watch(&self) -> watch::Receiver<LogHead> {
        self.head.subscribe()
    }
}
