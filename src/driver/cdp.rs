//! Live page driver over the Chrome DevTools Protocol (chromiumoxide).
//!
//! Selector handling: plain CSS selectors go through `querySelector`; the
//! `text=...` pseudo-selector (used for buttons identified by caption)
//! matches leaf elements whose trimmed text equals the needle and is
//! resolved in page-side JavaScript.

use crate::config::Config;
use crate::driver::{BrowserSession, PageDriver};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How often `wait_for_network_idle` re-checks the document state.
const READY_POLL: Duration = Duration::from_millis(250);
/// Settle time after the document reports complete, to let late XHRs land.
const READY_SETTLE: Duration = Duration::from_millis(500);

pub struct CdpSession {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

impl CdpSession {
    /// Launch Chrome with the run's user agent and head mode.
    pub async fn launch(config: &Config) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .viewport(None)
            .arg(format!("--user-agent={}", config.user_agent));
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(Error::Driver)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(Error::driver)?;

        // The CDP event stream must be drained for the browser to function.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("cdp handler: {e}");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
        })
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn new_tab(&self) -> Result<Arc<dyn PageDriver>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(Error::driver)?;
        Ok(Arc::new(CdpPage { page }))
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("browser close reported: {e}");
        }
        if let Err(e) = browser.wait().await {
            warn!("browser process wait reported: {e}");
        }
        self.handler_task.abort();
        Ok(())
    }
}

pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    async fn eval_i64(&self, script: String) -> Result<i64> {
        self.page
            .evaluate(script)
            .await
            .map_err(Error::driver)?
            .into_value()
            .map_err(Error::driver)
    }

    async fn eval_bool(&self, script: String) -> Result<bool> {
        self.page
            .evaluate(script)
            .await
            .map_err(Error::driver)?
            .into_value()
            .map_err(Error::driver)
    }
}

/// JS expression matching `selector`, yielding an array of elements.
fn js_matches(selector: &str) -> String {
    if let Some(text) = selector.strip_prefix("text=") {
        let needle = serde_json::to_string(text).unwrap_or_default();
        format!(
            "Array.from(document.querySelectorAll('body *'))\
             .filter(el => el.childElementCount === 0 && el.textContent.trim() === {needle})"
        )
    } else {
        let sel = serde_json::to_string(selector).unwrap_or_default();
        format!("Array.from(document.querySelectorAll({sel}))")
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| Error::Driver(format!("navigation to {url} timed out")))?
            .map_err(Error::driver)?;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ready = self
                .eval_bool("document.readyState === 'complete'".to_string())
                .await
                .unwrap_or(false);
            if ready {
                tokio::time::sleep(READY_SETTLE).await;
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Driver("page did not settle in time".to_string()));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        if selector.starts_with("text=") {
            let clicked = self
                .eval_bool(format!(
                    "(() => {{ const m = {}; if (!m.length) return false; m[0].click(); return true; }})()",
                    js_matches(selector)
                ))
                .await?;
            if !clicked {
                return Err(Error::Driver(format!("no element matches {selector}")));
            }
            return Ok(());
        }

        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| Error::Driver(format!("element {selector} not found: {e}")))?;
        element.click().await.map_err(Error::driver)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| Error::Driver(format!("element {selector} not found: {e}")))?;
        element.click().await.map_err(Error::driver)?;
        element.type_str(value).await.map_err(Error::driver)?;
        Ok(())
    }

    async fn check(&self, selector: &str) -> Result<()> {
        let sel = serde_json::to_string(selector).unwrap_or_default();
        let checked = self
            .eval_bool(format!(
                "(() => {{ const el = document.querySelector({sel}); \
                 if (!el) return false; if (!el.checked) el.click(); return true; }})()"
            ))
            .await?;
        if !checked {
            return Err(Error::Driver(format!("no checkbox matches {selector}")));
        }
        Ok(())
    }

    async fn locator_count(&self, selector: &str) -> Result<usize> {
        let count = self
            .eval_i64(format!("{}.length", js_matches(selector)))
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn activate(&self) -> Result<()> {
        self.page.bring_to_front().await.map_err(Error::driver)?;
        Ok(())
    }
}
