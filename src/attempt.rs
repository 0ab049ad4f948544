//! Per-email registration attempt state machine.
//!
//! `Init → PageLoaded → FormFilled → AwaitingHuman → Submitted →
//! VerifyPending → Terminal(Success|Failed)`.
//!
//! `AwaitingHuman` is a suspension point: no captcha solver exists, so
//! manual completion (agreement box, captcha, submit click, phone/QR
//! verification) is mandatory policy. The machine polls the intent board
//! at a bounded interval until the operator signals done or skip, staying
//! responsive to switch-tab requests the whole time. There is no automatic
//! timeout on the human wait; only the captcha sub-wait is bounded.
//!
//! Entering `Terminal` is the only place an outcome record is written, and
//! it is written exactly once per attempt.

use crate::config::Config;
use crate::driver::PageDriver;
use crate::emails::local_part;
use crate::error::{Error, Result};
use crate::intent::{IntentBoard, Reporter, RunEvent};
use crate::store::{OutcomeRecord, OutcomeStatus, OutcomeStore};
use crate::tabs::TabPool;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const REASON_NAVIGATION_FAILED: &str = "navigation failed";
pub const REASON_NOT_VERIFIED: &str = "verification not completed or unknown error";
pub const REASON_SKIPPED: &str = "skipped by operator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Init,
    PageLoaded,
    FormFilled,
    AwaitingHuman,
    Submitted,
    VerifyPending,
    Terminal(AttemptOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed,
}

impl AttemptState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PageLoaded => "page_loaded",
            Self::FormFilled => "form_filled",
            Self::AwaitingHuman => "awaiting_human",
            Self::Submitted => "submitted",
            Self::VerifyPending => "verify_pending",
            Self::Terminal(AttemptOutcome::Success) => "success",
            Self::Terminal(AttemptOutcome::Failed) => "failed",
        }
    }
}

/// How an attempt ended, plus whether its durable record made it to disk.
#[derive(Debug, Clone)]
pub struct TerminalReport {
    pub outcome: AttemptOutcome,
    pub reason: Option<String>,
    pub recorded: bool,
}

enum HumanSignal {
    Done,
    Skip,
}

pub struct AttemptRunner<'a> {
    email: &'a str,
    password: &'a str,
    phone: &'a str,
    driver: Arc<dyn PageDriver>,
    config: &'a Config,
    intents: &'a IntentBoard,
    reporter: &'a Reporter,
    store: &'a OutcomeStore,
    state: AttemptState,
}

impl<'a> AttemptRunner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        email: &'a str,
        password: &'a str,
        phone: &'a str,
        driver: Arc<dyn PageDriver>,
        config: &'a Config,
        intents: &'a IntentBoard,
        reporter: &'a Reporter,
        store: &'a OutcomeStore,
    ) -> Self {
        Self {
            email,
            password,
            phone,
            driver,
            config,
            intents,
            reporter,
            store,
            state: AttemptState::Init,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    fn enter(&mut self, state: AttemptState) {
        self.reporter.state_changed(self.email, state.name());
        self.state = state;
    }

    /// Drive the attempt to a terminal state. Never bubbles per-step driver
    /// errors: every path ends in a classified, recorded outcome.
    pub async fn run(&mut self, pool: &mut TabPool) -> TerminalReport {
        // A done signal raised before this attempt reached its human wait
        // is stale; dropping it here keeps a premature click from
        // auto-completing this attempt.
        let _ = self.intents.take_done();

        info!(email = self.email, "starting attempt");

        if let Err(e) = self.navigate_with_retry().await {
            warn!(email = self.email, "navigation exhausted retries: {e}");
            return self.finish(AttemptOutcome::Failed, REASON_NAVIGATION_FAILED);
        }
        self.enter(AttemptState::PageLoaded);

        if let Err(e) = self.fill_form().await {
            warn!(email = self.email, "form fill failed: {e}");
            return self.finish(AttemptOutcome::Failed, "form fill failed");
        }
        self.fill_phone().await;
        self.enter(AttemptState::FormFilled);

        match self.await_human(pool).await {
            HumanSignal::Skip => {
                // Operator-confirmed abandonment: no page inspection, the
                // in-progress verification is discarded as-is.
                info!(email = self.email, "attempt skipped by operator");
                self.finish(AttemptOutcome::Failed, REASON_SKIPPED)
            }
            HumanSignal::Done => self.classify().await,
        }
    }

    /// `Init → PageLoaded`: navigate, settle, select the normal
    /// registration mode. Backoff between tries is `base × attempt` seconds.
    async fn navigate_with_retry(&mut self) -> Result<()> {
        let max_attempts = self.config.retry.max_attempts;
        let mut last_err = Error::Driver("no navigation attempted".to_string());

        for attempt in 1..=max_attempts {
            match self.try_navigate().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        email = self.email,
                        attempt,
                        max_attempts,
                        "navigation attempt failed: {e}"
                    );
                    last_err = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry.backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn try_navigate(&self) -> Result<()> {
        let timeouts = &self.config.timeouts;
        self.driver
            .goto(&self.config.register_url, timeouts.page_load())
            .await?;
        self.driver
            .wait_for_network_idle(timeouts.navigation())
            .await?;
        self.driver
            .click(&self.config.selectors.normal_register_option)
            .await?;
        // Let the page swap in the selected registration mode.
        tokio::time::sleep(self.config.poll_interval()).await;
        Ok(())
    }

    /// `PageLoaded → FormFilled` (mandatory part): username and password.
    async fn fill_form(&self) -> Result<()> {
        let selectors = &self.config.selectors;
        let username = local_part(self.email);
        self.driver.fill(&selectors.username_input, username).await?;
        self.driver
            .fill(&selectors.password_input, self.password)
            .await?;

        // Agreement tick is best-effort; some page variants require the
        // human to do it inside the captcha flow.
        if let Err(e) = self.driver.check(&selectors.agree_checkbox).await {
            warn!(email = self.email, "agreement checkbox not ticked: {e}");
        }
        Ok(())
    }

    /// Phone collection is optional on some page variants, so nothing here
    /// can fail the attempt.
    async fn fill_phone(&self) {
        let selectors = &self.config.selectors;
        match self.driver.locator_count(&selectors.phone_input).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                warn!(email = self.email, "phone field probe failed: {e}");
                return;
            }
        }
        if let Err(e) = self.driver.fill(&selectors.phone_input, self.phone).await {
            warn!(email = self.email, "phone fill failed: {e}");
            return;
        }
        if let Err(e) = self.driver.click(&selectors.send_code_button).await {
            warn!(email = self.email, "sms code send failed: {e}");
        }
    }

    /// `FormFilled → AwaitingHuman`: suspend until the operator signals
    /// done or skip. Switch-tab intents keep being serviced, paused or not.
    async fn await_human(&mut self, pool: &mut TabPool) -> HumanSignal {
        self.enter(AttemptState::AwaitingHuman);
        self.report_pending_verifications().await;
        self.reporter.send(RunEvent::HumanNeeded {
            email: self.email.to_string(),
        });

        loop {
            if self.intents.take_skip() {
                return HumanSignal::Skip;
            }
            if self.intents.take_done() {
                return HumanSignal::Done;
            }
            if let Some(index) = self.intents.take_switch_tab() {
                if let Err(e) = pool.switch_to(index).await {
                    warn!("switch tab request rejected: {e}");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Tell the operator what the page is asking for before they go look.
    async fn report_pending_verifications(&self) {
        let selectors = &self.config.selectors;
        if matches!(self.driver.locator_count(&selectors.captcha_frame).await, Ok(n) if n > 0) {
            info!(email = self.email, "graphic captcha present");
        }
        let phone_verify = matches!(
            self.driver.locator_count(&selectors.phone_verify_page).await,
            Ok(n) if n > 0
        ) || matches!(
            self.driver
                .locator_count(&selectors.verification_code_input)
                .await,
            Ok(n) if n > 0
        );
        if phone_verify {
            info!(email = self.email, "phone or QR verification required");
        }
    }

    /// `AwaitingHuman → Submitted → VerifyPending → Terminal` on the done
    /// signal: re-check the captcha (it can reappear after the human's
    /// submit), then classify by the success marker.
    async fn classify(&mut self) -> TerminalReport {
        self.enter(AttemptState::Submitted);

        if let Err(e) = self.wait_for_captcha_clear().await {
            warn!(email = self.email, "captcha did not clear: {e}");
            return self.finish(AttemptOutcome::Failed, REASON_NOT_VERIFIED);
        }

        self.enter(AttemptState::VerifyPending);
        let marker = &self.config.selectors.register_success;
        match self.driver.locator_count(marker).await {
            Ok(n) if n > 0 => {
                info!(email = self.email, "registration succeeded");
                self.finish_ok()
            }
            Ok(_) => self.finish(AttemptOutcome::Failed, REASON_NOT_VERIFIED),
            Err(e) => {
                warn!(email = self.email, "success check failed: {e}");
                self.finish(AttemptOutcome::Failed, REASON_NOT_VERIFIED)
            }
        }
    }

    /// Bounded sub-wait for a captcha iframe to disappear. Unlike the human
    /// wait proper, this has a timeout so a stuck captcha cannot hang the
    /// attempt forever.
    async fn wait_for_captcha_clear(&self) -> Result<()> {
        let selector = &self.config.selectors.captcha_frame;
        match self.driver.locator_count(selector).await {
            Ok(0) => return Ok(()),
            Ok(_) => info!(email = self.email, "captcha reappeared, waiting"),
            Err(e) => {
                warn!(email = self.email, "captcha probe failed: {e}");
                return Ok(());
            }
        }

        let timeout = self.config.timeouts.captcha();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if matches!(self.driver.locator_count(selector).await, Ok(0)) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::HumanTimeout(timeout));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    fn finish_ok(&mut self) -> TerminalReport {
        self.finish_with(AttemptOutcome::Success, None)
    }

    fn finish(&mut self, outcome: AttemptOutcome, reason: &str) -> TerminalReport {
        self.finish_with(outcome, Some(reason.to_string()))
    }

    /// Terminal transition: classify, persist, report. The single
    /// persistence point for the attempt.
    fn finish_with(&mut self, outcome: AttemptOutcome, reason: Option<String>) -> TerminalReport {
        self.enter(AttemptState::Terminal(outcome));

        let status = match outcome {
            AttemptOutcome::Success => OutcomeStatus::Success,
            AttemptOutcome::Failed => OutcomeStatus::Failed,
        };
        let record = OutcomeRecord::new(self.email, self.password, status, reason.clone());

        let recorded = match self.store.record(&record) {
            Ok(()) => true,
            Err(e) => {
                // The outcome stays logically terminal even without its
                // durable record; the operator is told so they can act.
                error!(email = self.email, "outcome record write failed: {e}");
                self.reporter.send(RunEvent::Error {
                    message: format!("failed to persist outcome for {}: {e}", self.email),
                });
                false
            }
        };

        self.reporter.send(RunEvent::AccountRecorded {
            email: self.email.to_string(),
            success: outcome == AttemptOutcome::Success,
        });

        TerminalReport {
            outcome,
            reason,
            recorded,
        }
    }
}
