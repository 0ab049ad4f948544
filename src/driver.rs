//! Page-driver capability seam.
//!
//! The orchestration core never talks to a browser library directly; it
//! consumes these two traits. The live implementation in [`cdp`] drives
//! Chrome over CDP; tests substitute scripted fakes.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "browser")]
pub mod cdp;

/// One browser tab. Selectors are CSS; `text=` and other engine-specific
/// selector syntaxes are resolved by the implementation.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate the tab to `url`, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until the page has settled after a navigation.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Replace the value of the first element matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Ensure a checkbox matching `selector` is checked.
    async fn check(&self, selector: &str) -> Result<()>;

    /// Number of elements currently matching `selector`.
    async fn locator_count(&self, selector: &str) -> Result<usize>;

    /// Bring this tab to the front so a human can interact with it.
    async fn activate(&self) -> Result<()>;
}

/// A shared browser context owning every tab of a run. One context is
/// shared across all tabs so the operator keeps per-tab session state
/// while multitasking between pending verifications.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new tab in the shared context.
    async fn new_tab(&self) -> Result<Arc<dyn PageDriver>>;

    /// Close the context and the browser process, closing every tab.
    async fn close(&self) -> Result<()>;
}
