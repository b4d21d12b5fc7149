//! Shared application state for the API server.

use std::sync::Arc;
use std::time::Duration;

use pentest_runner::registry::RunRegistry;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RunRegistry>,
    /// Interval between keep-alive comments on event streams.
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(registry: RunRegistry, keep_alive: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            keep_alive,
        }
    }
}
