//! Orchestration core for bulk webmail account registration.
//!
//! The hard part is not the browser calls but the sequencing: many
//! independent attempts, each of which may pause indefinitely for a human,
//! runs in its own browser tab, may be skipped, and must leave a durable
//! outcome record however it ends. See `run` for the loop, `attempt` for
//! the per-email state machine, and `driver` for the browser seam.

pub mod args;
pub mod attempt;
pub mod config;
pub mod driver;
pub mod emails;
pub mod error;
pub mod export;
pub mod intent;
pub mod logging;
pub mod run;
pub mod store;
pub mod tabs;

pub use error::{Error, Result};
