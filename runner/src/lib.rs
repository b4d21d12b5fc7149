//! Penetration-test run engine.
//!
//! A run probes one target URL through an [`executor::ActionExecutor`] and
//! records everything it does in an append-only, sequence-numbered event log.
//! Observers read that log by snapshot polling or by streaming; both go
//! through the same ordered read so they see identical sequences.
//!
//! - **[`core`]**: Pure, deterministic logic (types, lifecycle edges,
//!   outcome classification, client cursor). No I/O.
//! - **[`io`]**: Side-effecting collaborators (config files, HTTP probe).
//!
//! Orchestration lives at the crate root: [`registry`] creates runs,
//! [`driver`] advances them, [`delivery`] and [`follow`] read them back.

pub mod core;
pub mod delivery;
pub mod driver;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod follow;
pub mod io;
pub mod logging;
pub mod registry;
pub mod run_state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
