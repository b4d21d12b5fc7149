//! Read-only delivery of a run's events to observers.
//!
//! Both delivery modes are built on [`EventLog::read_from`]:
//!
//! - **Snapshot**: [`snapshot`] answers a stateless poll with the run metadata
//!   plus every event after the caller's cursor.
//! - **Stream**: [`subscribe`] yields events after a starting cursor as they
//!   are appended, then a final [`StreamItem::Finished`] once the run is
//!   terminal and fully delivered.
//!
//! Because both read the same ordered log through the same primitive, a
//! poller that resumes from its last sequence and a single stream subscriber
//! observe identical sequences.
//!
//! [`EventLog::read_from`]: crate::event_log::EventLog::read_from

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::core::types::{Event, Run, RunStatus};
use crate::registry::RunHandle;

/// Answer to a snapshot poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub run: Run,
    /// Events with `sequence > after`, ascending.
    pub events: Vec<Event>,
    /// Cursor to send on the next poll.
    pub cursor: u64,
}

/// Current run metadata plus all events after `after`.
pub fn snapshot(handle: &RunHandle, after: u64) -> Snapshot {
    // Metadata first: a terminal status implies the log read below is complete.
    let run = handle.run();
    let events = handle.log().read_from(after);
    let cursor = events.last().map_or(after, |event| event.sequence);
    Snapshot {
        run,
        events,
        cursor,
    }
}

/// Item yielded by a stream subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Event),
    /// The run is terminal and every event has been yielded.
    Finished { status: RunStatus },
}

/// Stream events with `sequence > after` as they are appended.
///
/// Dropping the stream ends delivery to that observer; nothing is buffered
/// on its behalf.
pub fn subscribe(handle: Arc<RunHandle>, after: u64) -> impl Stream<Item = StreamItem> + Send {
    async_stream::stream! {
        let mut head = handle.log().watch();
        let mut cursor = after;

        loop {
            // Mark the head seen before reading so any later append wakes us.
            let seen = *head.borrow_and_update();
            for event in handle.log().read_from(cursor) {
                cursor = event.sequence;
                yield StreamItem::Event(event);
            }

            if seen.sealed && cursor >= seen.last_sequence {
                yield StreamItem::Finished { status: handle.status() };
                break;
            }
            if head.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Resolve once the run reaches a terminal status; returns its final metadata.
pub async fn wait_for_terminal(handle: &RunHandle) -> Run {
    let mut head = handle.log().watch();
    loop {
        if head.borrow_and_update().sealed {
            return handle.run();
        }
        if head.changed().await.is_err() {
            return handle.run();
        }
    }
}
