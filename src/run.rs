//! Orchestrator: sequences attempts across the email list.
//!
//! A single logical worker drives the loop; the controller lives on its own
//! task and talks to it only through the [`IntentBoard`] and the event
//! channel. The loop polls intents once per iteration, so pausing freezes
//! progression without freezing tab control, and an indefinite human wait
//! never makes the run deaf to the operator.
//!
//! Cleanup discipline: the browser context is closed and run completion is
//! reported exactly once, on every exit path, including run-level errors.

use crate::attempt::{AttemptOutcome, AttemptRunner, TerminalReport};
use crate::config::Config;
use crate::driver::BrowserSession;
use crate::emails::generate_range;
use crate::error::Result;
use crate::intent::{IntentBoard, Reporter, RunEvent};
use crate::store::OutcomeStore;
use crate::tabs::TabPool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything a run needs besides the browser: the generated email list
/// and the credentials shared across its attempts.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub emails: Vec<String>,
    pub password: String,
    pub phone: String,
}

impl RunPlan {
    /// Build a plan for the inclusive prefix range `[start, end]`.
    pub fn from_range(
        config: &Config,
        start: &str,
        end: &str,
        password: String,
        phone: String,
    ) -> Result<Self> {
        let emails = generate_range(start, end, &config.domain)?;
        Ok(Self {
            emails,
            password,
            phone,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Orchestrator {
    config: Config,
    intents: Arc<IntentBoard>,
    reporter: Reporter,
    store: OutcomeStore,
}

impl Orchestrator {
    pub fn new(config: Config, intents: Arc<IntentBoard>, reporter: Reporter) -> Result<Self> {
        config.validate()?;
        let store = OutcomeStore::new(&config.data_file, &config.backup_file);
        Ok(Self {
            config,
            intents,
            reporter,
            store,
        })
    }

    /// Run every attempt in the plan, then tear down the browser and
    /// report completion. The teardown and the single completion event
    /// happen whether the loop finished, failed, or was cancelled early.
    pub async fn execute(
        &self,
        session: Box<dyn BrowserSession>,
        plan: &RunPlan,
    ) -> Result<RunSummary> {
        info!(total = plan.emails.len(), "starting run");

        // The pool wraps the session before any fallible work so the
        // teardown below runs even when opening the initial tab fails.
        let mut pool = TabPool::new(session);
        let result = match pool.open_initial().await {
            Ok(()) => self.drive(&mut pool, plan).await,
            Err(e) => Err(e),
        };

        if let Err(e) = pool.close_all().await {
            warn!("browser teardown reported: {e}");
        }

        match result {
            Ok(summary) => {
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "run complete"
                );
                self.reporter.send(RunEvent::Completed);
                Ok(summary)
            }
            Err(e) => {
                error!("run aborted: {e}");
                self.reporter.send(RunEvent::Error {
                    message: e.to_string(),
                });
                self.reporter.send(RunEvent::Completed);
                Err(e)
            }
        }
    }

    async fn drive(&self, pool: &mut TabPool, plan: &RunPlan) -> Result<RunSummary> {
        let total = plan.emails.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        let mut index = 0;

        while index < total {
            // Pausing freezes progression, not tab control.
            while self.intents.is_paused() {
                self.service_switch_tab(pool).await;
                tokio::time::sleep(self.config.poll_interval()).await;
            }

            // A pending skip consumes the current slot outright.
            if self.intents.take_skip() {
                info!(email = plan.emails[index].as_str(), "slot skipped before start");
                summary.skipped += 1;
                index += 1;
                self.reporter.send(RunEvent::Progress { index, total });
                continue;
            }

            self.service_switch_tab(pool).await;

            let email = &plan.emails[index];
            // The first attempt reuses the run's initial tab; every later
            // attempt gets a fresh one so pending verifications stack up
            // without blocking each other.
            let driver = if index == 0 {
                pool.bind(0, email);
                pool.driver(0)?
            } else {
                match pool.create_tab(email).await {
                    Ok(driver) => driver,
                    Err(e) => {
                        // Not retried: one failed tab costs one slot.
                        error!(email = email.as_str(), "tab creation failed: {e}");
                        self.reporter.send(RunEvent::Error {
                            message: format!("tab creation failed for {email}: {e}"),
                        });
                        summary.failed += 1;
                        index += 1;
                        self.reporter.send(RunEvent::Progress { index, total });
                        continue;
                    }
                }
            };

            let mut runner = AttemptRunner::new(
                email,
                &plan.password,
                &plan.phone,
                driver,
                &self.config,
                &self.intents,
                &self.reporter,
                &self.store,
            );
            let report = runner.run(pool).await;
            match report.outcome {
                AttemptOutcome::Success => summary.succeeded += 1,
                AttemptOutcome::Failed => summary.failed += 1,
            }

            // Success and failure both consume exactly one slot; an email
            // index is never replayed.
            index += 1;
            self.reporter.send(RunEvent::Progress { index, total });
        }

        Ok(summary)
    }

    async fn service_switch_tab(&self, pool: &mut TabPool) {
        if let Some(index) = self.intents.take_switch_tab() {
            if let Err(e) = pool.switch_to(index).await {
                warn!("switch tab request rejected: {e}");
            }
        }
    }
}

/// Single-shot mode: one attempt end-to-end with the same state machine,
/// a settle delay so the operator can see the final page, then teardown.
pub async fn run_single(
    config: &Config,
    session: Box<dyn BrowserSession>,
    intents: Arc<IntentBoard>,
    reporter: Reporter,
    local: &str,
    password: &str,
    phone: &str,
) -> Result<TerminalReport> {
    config.validate()?;
    let email = format!("{local}{}", config.domain);
    let store = OutcomeStore::new(&config.data_file, &config.backup_file);

    let mut pool = TabPool::new(session);
    let result = drive_single(
        &mut pool, config, &intents, &reporter, &store, &email, password, phone,
    )
    .await;

    if let Err(e) = pool.close_all().await {
        warn!("browser teardown reported: {e}");
    }
    match result {
        Ok(report) => {
            reporter.send(RunEvent::Completed);
            Ok(report)
        }
        Err(e) => {
            error!("single-shot run aborted: {e}");
            reporter.send(RunEvent::Error {
                message: e.to_string(),
            });
            reporter.send(RunEvent::Completed);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_single(
    pool: &mut TabPool,
    config: &Config,
    intents: &IntentBoard,
    reporter: &Reporter,
    store: &OutcomeStore,
    email: &str,
    password: &str,
    phone: &str,
) -> Result<TerminalReport> {
    pool.open_initial().await?;
    pool.bind(0, email);
    let driver = pool.driver(0)?;

    let mut runner = AttemptRunner::new(
        email, password, phone, driver, config, intents, reporter, store,
    );
    let report = runner.run(pool).await;

    info!(delay = ?config.settle_delay(), "settling before browser teardown");
    tokio::time::sleep(config.settle_delay()).await;
    Ok(report)
}
