//! Side-effecting collaborators: configuration files and the HTTP probe.

pub mod config;
pub mod http_probe;
