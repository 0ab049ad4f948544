//! Tab pool: one shared browser context, a grow-only set of tabs.
//!
//! Each attempt after the first gets its own tab so one attempt's pending
//! human verification never blocks the next attempt from starting. Tab
//! indices are assigned in creation order and never reused within a run;
//! closing happens only wholesale at run end.

use crate::driver::{BrowserSession, PageDriver};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct TabRecord {
    pub index: usize,
    pub email: Option<String>,
    driver: Arc<dyn PageDriver>,
}

pub struct TabPool {
    session: Box<dyn BrowserSession>,
    tabs: Vec<TabRecord>,
    active: usize,
}

impl TabPool {
    /// Take ownership of the session. No tab exists yet; `close_all` is
    /// already valid, so a failed `open_initial` still has a cleanup path.
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session,
            tabs: Vec::new(),
            active: 0,
        }
    }

    /// Open the run's initial tab (index 0).
    pub async fn open_initial(&mut self) -> Result<()> {
        let driver = self.session.new_tab().await?;
        self.tabs.push(TabRecord {
            index: 0,
            email: None,
            driver,
        });
        self.active = 0;
        Ok(())
    }

    /// Open a new tab bound to `email`; it becomes the active tab.
    pub async fn create_tab(&mut self, email: &str) -> Result<Arc<dyn PageDriver>> {
        let driver = self.session.new_tab().await?;
        let index = self.tabs.len();
        self.tabs.push(TabRecord {
            index,
            email: Some(email.to_string()),
            driver: Arc::clone(&driver),
        });
        self.active = index;
        debug!(index, email, "opened tab");
        Ok(driver)
    }

    /// Bring an existing tab to the front. Other tabs stay live and keep
    /// their in-page state.
    pub async fn switch_to(&mut self, index: usize) -> Result<Arc<dyn PageDriver>> {
        let record = self.tabs.get(index).ok_or(Error::TabIndex {
            index,
            count: self.tabs.len(),
        })?;
        record.driver.activate().await?;
        self.active = index;
        debug!(index, "switched active tab");
        Ok(Arc::clone(&record.driver))
    }

    pub fn count(&self) -> usize {
        self.tabs.len()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Driver handle for an existing tab.
    pub fn driver(&self, index: usize) -> Result<Arc<dyn PageDriver>> {
        self.tabs
            .get(index)
            .map(|record| Arc::clone(&record.driver))
            .ok_or(Error::TabIndex {
                index,
                count: self.tabs.len(),
            })
    }

    /// Bind an attempt's email to a tab record (used for the initial tab,
    /// which exists before any attempt does).
    pub fn bind(&mut self, index: usize, email: &str) {
        if let Some(record) = self.tabs.get_mut(index) {
            record.email = Some(email.to_string());
        }
    }

    /// Close the browser context and process, releasing every tab. The sole
    /// cleanup path; the orchestrator calls it on every run exit.
    pub async fn close_all(self) -> Result<()> {
        info!(tabs = self.tabs.len(), "closing browser context");
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct NullPage {
        activations: AtomicUsize,
    }

    #[async_trait]
    impl PageDriver for NullPage {
        async fn goto(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn check(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn locator_count(&self, _selector: &str) -> Result<usize> {
            Ok(0)
        }
        async fn activate(&self) -> Result<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullSession {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl BrowserSession for NullSession {
        async fn new_tab(&self) -> Result<Arc<dyn PageDriver>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullPage::default()))
        }
        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn opened_pool() -> TabPool {
        let mut pool = TabPool::new(Box::new(NullSession::default()));
        pool.open_initial().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn open_initial_creates_the_unbound_first_tab() {
        let mut pool = opened_pool().await;
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.active_index(), 0);
        pool.bind(0, "a@x.com");
        assert!(pool.driver(0).is_ok());
    }

    #[tokio::test]
    async fn created_tabs_get_increasing_indices_and_become_active() {
        let mut pool = opened_pool().await;
        pool.create_tab("b@x.com").await.unwrap();
        pool.create_tab("c@x.com").await.unwrap();
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.active_index(), 2);

        pool.switch_to(1).await.unwrap();
        assert_eq!(pool.active_index(), 1);
    }

    #[tokio::test]
    async fn close_all_without_tabs_still_closes_the_session() {
        let pool = TabPool::new(Box::new(NullSession::default()));
        pool.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn switch_to_out_of_range_reports_index_and_count() {
        let mut pool = opened_pool().await;
        let err = pool
            .switch_to(5)
            .await
            .err()
            .expect("out-of-range switch must fail");
        match err {
            Error::TabIndex { index, count } => {
                assert_eq!(index, 5);
                assert_eq!(count, 1);
            }
            other => panic!("expected TabIndex error, got {other:?}"),
        }
        // A failed switch leaves the active tab untouched.
        assert_eq!(pool.active_index(), 0);
    }
}
