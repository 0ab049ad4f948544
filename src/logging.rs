//! Structured logging setup.
//!
//! Uses `tracing` with `tracing-subscriber`. The filter comes from
//! `MAILREG_LOG` or `RUST_LOG` (e.g. `mailreg=debug,warn`), defaulting to
//! `mailreg=info,warn`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "mailreg=info,warn";

/// Initialize the global subscriber. Call once, early in `main`.
pub fn init() {
    let filter = std::env::var("MAILREG_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .init();
}
