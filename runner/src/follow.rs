//! Follower loop: snapshot polling with cursor resumption.
//!
//! [`follow_run`] owns no hidden state: the caller passes a [`ClientCursor`]
//! in and can persist it between calls (or across process restarts) to resume
//! exactly where it stopped. Fetch errors and rejected pages never end the
//! loop; it backs off and polls again from the last delivered sequence until
//! a terminal run status is observed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::cursor::ClientCursor;
use crate::core::types::{Event, Run};
use crate::delivery::{Snapshot, snapshot};
use crate::registry::RunHandle;

/// Where snapshot pages come from (HTTP, in-process, ...).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, after: u64) -> Result<Snapshot>;
}

/// In-process source reading straight from a run handle.
#[async_trait]
impl SnapshotSource for Arc<RunHandle> {
    async fn fetch(&self, after: u64) -> Result<Snapshot> {
        Ok(snapshot(self, after))
    }
}

/// Polling cadence and retry backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowConfig {
    /// Delay between successful polls of a running run.
    pub poll_interval: Duration,
    /// First delay after a failed poll; doubles up to `max_backoff`.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Poll `source` until the run is terminal, handing each new event to
/// `on_event` exactly once and in order. Returns the final run metadata.
pub async fn follow_run<S, F>(
    source: &S,
    cursor: &mut ClientCursor,
    config: &FollowConfig,
    mut on_event: F,
) -> Run
where
    S: SnapshotSource + ?Sized,
    F: FnMut(&Event),
{
    let mut backoff = config.initial_backoff;

    loop {
        let page = match source.fetch(cursor.last_seq).await {
            Ok(page) => page,
            Err(err) => {
                warn!(after = cursor.last_seq, error = %err, ?backoff, "snapshot poll failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        };

        match cursor.accept(page.run.status, page.events) {
            Ok(fresh) => {
                debug!(count = fresh.len(), last_seq = cursor.last_seq, "snapshot accepted");
                for event in &fresh {
                    on_event(event);
                }
                backoff = config.initial_backoff;
                if cursor.done {
                    return page.run;
                }
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(err) => {
                warn!(after = cursor.last_seq, error = %err, "snapshot page rejected, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, config.max_backoff);
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{EventType, RunStatus};
    use anyhow::anyhow;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn instant() -> FollowConfig {
        FollowConfig {
            poll_interval: Duration::ZERO,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn page(status: RunStatus, seqs: &[u64]) -> Snapshot {
        let mut run = Run::new("run-1", "http://x/");
        run.status = status;
        let events: Vec<Event> = seqs
            .iter()
            .map(|&sequence| Event {
                sequence,
                event_type: EventType::Info,
                message: String::new(),
                details: None,
                timestamp: Utc::now(),
            })
            .collect();
        let cursor = events.last().map_or(0, |e| e.sequence);
        Snapshot {
            run,
            events,
            cursor,
        }
    }

    /// Replays canned responses and records the cursor of each request.
    struct Canned {
        responses: Mutex<VecDeque<Result<Snapshot>>>,
        requests: Mutex<Vec<u64>>,
    }

    impl Canned {
        fn new(responses: Vec<Result<Snapshot>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for Canned {
        async fn fetch(&self, after: u64) -> Result<Snapshot> {
            self.requests.lock().expect("lock").push(after);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    #[tokio::test]
    async fn resumes_from_last_sequence_across_errors() {
        let source = Canned::new(vec![
            Ok(page(RunStatus::Running, &[1, 2, 3])),
            Err(anyhow!("connection reset")),
            // Server resent an overlapping page after the reconnect.
            Ok(page(RunStatus::Running, &[3, 4])),
            Ok(page(RunStatus::Running, &[6])),
            Ok(page(RunStatus::Completed, &[5, 6])),
        ]);
        let mut cursor = ClientCursor::new();
        let mut seen = Vec::new();

        let run = follow_run(&source, &mut cursor, &instant(), |e| seen.push(e.sequence)).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(
            cursor,
            ClientCursor {
                last_seq: 6,
                done: true
            }
        );
        assert_eq!(*source.requests.lock().expect("lock"), vec![0, 3, 3, 4, 4]);
    }

    #[tokio::test]
    async fn finished_cursor_returns_on_first_terminal_page() {
        let source = Canned::new(vec![Ok(page(RunStatus::Failed, &[]))]);
        let mut cursor = ClientCursor::resume_from(7);
        let mut calls = 0;

        let run = follow_run(&source, &mut cursor, &instant(), |_| calls += 1).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(calls, 0);
        assert_eq!(*source.requests.lock().expect("lock"), vec![7]);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_millis(1000);
        assert_eq!(
            next_backoff(Duration::from_millis(300), max),
            Duration::from_millis(600)
        );
        assert_eq!(next_backoff(Duration::from_millis(600), max), max);
        assert_eq!(next_backoff(max, max), max);
    }
}
