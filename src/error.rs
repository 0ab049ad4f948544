//! Typed error hierarchy for the registration orchestrator.
//!
//! One enum covers the four failure domains: browser driving, run
//! configuration, outcome-store I/O, and bounded human waits. Per-attempt
//! driver failures are handled by the attempt state machine (retried or
//! recorded as a failed outcome); configuration errors are fatal at run
//! start; store I/O errors are surfaced but never abort a run.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Navigation or element interaction failed. CDP error types vary, so
    /// the cause is carried as a message.
    #[error("driver error: {0}")]
    Driver(String),

    /// Invalid run configuration, rejected before any browser work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Outcome store write or backup replication failed. The caller must
    /// assume no durable record was made.
    #[error("outcome store I/O failed: {0}")]
    Store(#[from] std::io::Error),

    /// A captcha-specific bounded wait expired. Human-verification waits
    /// proper have no timeout and never produce this.
    #[error("captcha wait timed out after {0:?}")]
    HumanTimeout(Duration),

    /// A switch-tab request targeted an index outside the tab pool.
    #[error("tab index {index} out of range (pool has {count} tabs)")]
    TabIndex { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for driver failures built from display-able causes.
    pub fn driver(cause: impl std::fmt::Display) -> Self {
        Self::Driver(cause.to_string())
    }
}
