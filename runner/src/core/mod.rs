//! Deterministic, pure logic shared by the run engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod cursor;
pub mod lifecycle;
pub mod outcome;
pub mod types;
