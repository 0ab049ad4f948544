//! End-to-end orchestration scenarios over a scripted fake browser.
//!
//! These tests drive the real run loop, attempt state machine, tab pool,
//! and outcome store; only the page driver is fake.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mailreg::attempt::{REASON_NOT_VERIFIED, REASON_SKIPPED};
use mailreg::config::Config;
use mailreg::driver::{BrowserSession, PageDriver};
use mailreg::error::{Error, Result};
use mailreg::intent::{IntentBoard, Reporter, RunEvent};
use mailreg::run::{Orchestrator, RunPlan};
use mailreg::store::CSV_HEADER;

const SUCCESS_MARKER: &str = ".register-success";
const CAPTCHA_FRAME: &str = "iframe[name*='captcha']";

/// Behavior of one scripted tab.
#[derive(Clone, Default)]
struct PageScript {
    /// Success marker present after the human finishes.
    success: bool,
    /// Number of initial goto calls that fail.
    goto_failures: u32,
    /// Captcha iframe stays present forever (exercises the bounded wait).
    captcha_stuck: bool,
}

struct FakePage {
    counts: Mutex<HashMap<String, usize>>,
    goto_failures: Mutex<u32>,
    ops: Mutex<Vec<String>>,
}

impl FakePage {
    fn new(script: &PageScript) -> Self {
        let mut counts = HashMap::new();
        counts.insert(SUCCESS_MARKER.to_string(), usize::from(script.success));
        counts.insert(CAPTCHA_FRAME.to_string(), usize::from(script.captcha_stuck));
        Self {
            counts: Mutex::new(counts),
            goto_failures: Mutex::new(script.goto_failures),
            ops: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut remaining = self.goto_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::Driver("connection reset".to_string()));
        }
        self.log(format!("goto {url}"));
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.log(format!("click {selector}"));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.log(format!("fill {selector}={value}"));
        Ok(())
    }

    async fn check(&self, selector: &str) -> Result<()> {
        self.log(format!("check {selector}"));
        Ok(())
    }

    async fn locator_count(&self, selector: &str) -> Result<usize> {
        self.log(format!("count {selector}"));
        Ok(self
            .counts
            .lock()
            .unwrap()
            .get(selector)
            .copied()
            .unwrap_or(0))
    }

    async fn activate(&self) -> Result<()> {
        self.log("activate".to_string());
        Ok(())
    }
}

struct FakeSession {
    scripts: Mutex<VecDeque<PageScript>>,
    pages: Mutex<Vec<Arc<FakePage>>>,
    new_tab_calls: AtomicUsize,
    /// 1-based call number at which new_tab starts failing (0 = never).
    fail_new_tab_at: usize,
    closed: AtomicBool,
}

impl FakeSession {
    fn new(scripts: Vec<PageScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            pages: Mutex::new(Vec::new()),
            new_tab_calls: AtomicUsize::new(0),
            fail_new_tab_at: 0,
            closed: AtomicBool::new(false),
        })
    }

    fn failing_at(scripts: Vec<PageScript>, call: usize) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            pages: Mutex::new(Vec::new()),
            new_tab_calls: AtomicUsize::new(0),
            fail_new_tab_at: call,
            closed: AtomicBool::new(false),
        })
    }

    fn page(&self, index: usize) -> Arc<FakePage> {
        Arc::clone(&self.pages.lock().unwrap()[index])
    }

    fn tab_count(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}

/// Cloneable handle so tests can keep inspecting the session after the
/// orchestrator takes ownership of its boxed half.
struct SessionHandle(Arc<FakeSession>);

#[async_trait]
impl BrowserSession for SessionHandle {
    async fn new_tab(&self) -> Result<Arc<dyn PageDriver>> {
        let call = self.0.new_tab_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.0.fail_new_tab_at != 0 && call >= self.0.fail_new_tab_at {
            return Err(Error::Driver("browser context exhausted".to_string()));
        }
        let script = self
            .0
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let page = Arc::new(FakePage::new(&script));
        self.0.pages.lock().unwrap().push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> Result<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.poll_interval_ms = 10;
    config.settle_delay_secs = 0;
    config.retry.max_attempts = 2;
    config.retry.base_delay_secs = 0;
    config.timeouts.captcha_ms = 100;
    config.data_file = dir.path().join("accounts.csv");
    config.backup_file = dir.path().join("accounts_backup.csv");
    config.export_dir = dir.path().join("exports");
    config
}

fn plan_for(config: &Config, start: &str, end: &str) -> RunPlan {
    RunPlan::from_range(
        config,
        start,
        end,
        "Secret1".to_string(),
        "19921680956".to_string(),
    )
    .unwrap()
}

struct Harness {
    intents: Arc<IntentBoard>,
    events: mailreg::intent::EventReceiver,
    run: tokio::task::JoinHandle<Result<mailreg::run::RunSummary>>,
}

fn start_run(config: Config, session: &Arc<FakeSession>, plan: RunPlan) -> Harness {
    let intents = Arc::new(IntentBoard::new());
    let (reporter, events) = Reporter::channel();
    let orchestrator = Orchestrator::new(config, Arc::clone(&intents), reporter).unwrap();
    let boxed: Box<dyn BrowserSession> = Box::new(SessionHandle(Arc::clone(session)));
    let run = tokio::spawn(async move { orchestrator.execute(boxed, &plan).await });
    Harness {
        intents,
        events,
        run,
    }
}

async fn recv(events: &mut mailreg::intent::EventReceiver) -> RunEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event channel stalled")
        .expect("event channel closed early")
}

fn read_rows(config: &Config) -> Vec<String> {
    std::fs::read_to_string(&config.data_file)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn three_attempts_happy_path() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = FakeSession::new(vec![
        PageScript { success: true, ..Default::default() },
        PageScript { success: true, ..Default::default() },
        PageScript { success: true, ..Default::default() },
    ]);
    let plan = plan_for(&config, "user01", "user03");
    assert_eq!(
        plan.emails,
        vec!["user01@163.com", "user02@163.com", "user03@163.com"]
    );

    let mut h = start_run(config.clone(), &session, plan);
    let mut completed = 0;
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.mark_done(),
            RunEvent::Completed => {
                completed += 1;
                break;
            }
            _ => {}
        }
    }
    // Drain: completion must be reported exactly once.
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), h.events.recv()).await
    {
        assert_ne!(event, RunEvent::Completed);
    }
    assert_eq!(completed, 1);

    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    // One tab per attempt, created in index order 0, 1, 2.
    assert_eq!(session.tab_count(), 3);
    assert!(session.closed.load(Ordering::SeqCst));

    // Exactly N rows for N attempts, plus the single header.
    let rows = read_rows(&config);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], CSV_HEADER);
    assert!(rows[1].starts_with("user01@163.com,Secret1,success,"));
    assert!(rows[2].starts_with("user02@163.com,Secret1,success,"));
    assert!(rows[3].starts_with("user03@163.com,Secret1,success,"));

    // Byte-for-byte backup mirror.
    let primary = std::fs::read(&config.data_file).unwrap();
    let backup = std::fs::read(&config.backup_file).unwrap();
    assert_eq!(primary, backup);

    // Each attempt filled its own local part on its own tab.
    for (i, email) in ["user01", "user02", "user03"].iter().enumerate() {
        let ops = session.page(i).ops();
        assert!(
            ops.iter()
                .any(|op| op == &format!("fill input[placeholder='邮箱地址']={email}")),
            "tab {i} missing username fill: {ops:?}"
        );
    }
}

#[tokio::test]
async fn skip_during_awaiting_human_never_classifies() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // The page would classify as success; skipping must not look at it.
    let session = FakeSession::new(vec![PageScript { success: true, ..Default::default() }]);
    let plan = plan_for(&config, "user01", "user01");

    let mut h = start_run(config.clone(), &session, plan);
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.request_skip(),
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.failed, 1);

    let rows = read_rows(&config);
    assert_eq!(rows.len(), 2);
    assert!(rows[1].contains(REASON_SKIPPED));
    assert!(rows[1].starts_with("user01@163.com,Secret1,failed,"));

    // Success-classification logic never ran.
    let ops = session.page(0).ops();
    assert!(
        !ops.iter().any(|op| op == &format!("count {SUCCESS_MARKER}")),
        "skip path inspected the page: {ops:?}"
    );
}

#[tokio::test]
async fn navigation_failure_records_and_consumes_slot() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Both allowed attempts fail; the second email works normally.
    let session = FakeSession::new(vec![
        PageScript { goto_failures: 99, ..Default::default() },
        PageScript { success: true, ..Default::default() },
    ]);
    let plan = plan_for(&config, "user01", "user02");

    let mut h = start_run(config.clone(), &session, plan);
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.mark_done(),
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);

    let rows = read_rows(&config);
    assert_eq!(rows.len(), 3);
    assert!(rows[1].contains("navigation failed"));
    assert!(rows[2].starts_with("user02@163.com,Secret1,success,"));
}

#[tokio::test]
async fn tab_creation_failure_advances_without_retry() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Call 1 opens the initial tab; call 2 (second attempt's tab) fails.
    let session = FakeSession::failing_at(
        vec![PageScript { success: true, ..Default::default() }],
        2,
    );
    let plan = plan_for(&config, "user01", "user02");

    let mut h = start_run(config.clone(), &session, plan);
    let mut errors = 0;
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.mark_done(),
            RunEvent::Error { .. } => errors += 1,
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(errors, 1);
    // Exactly one failed new_tab call beyond the initial tab: no retry.
    assert_eq!(session.new_tab_calls.load(Ordering::SeqCst), 2);
    // The doomed second attempt never started, so only one row exists.
    assert_eq!(read_rows(&config).len(), 2);
    assert!(session.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn pause_during_human_wait_still_services_switch_tab() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = FakeSession::new(vec![
        PageScript { success: true, ..Default::default() },
        PageScript { success: true, ..Default::default() },
    ]);
    let plan = plan_for(&config, "user01", "user02");

    let mut h = start_run(config.clone(), &session, plan);
    let mut human_waits = 0;
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => {
                human_waits += 1;
                if human_waits == 1 {
                    // Freeze progression, then ask for tab 0: the switch
                    // must be serviced while paused.
                    h.intents.pause();
                    h.intents.request_switch_tab(0);
                    let page = session.page(0);
                    tokio::time::timeout(Duration::from_secs(5), async {
                        while !page.ops().iter().any(|op| op == "activate") {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    })
                    .await
                    .expect("switch tab was not serviced while paused");
                    h.intents.resume();
                }
                h.intents.mark_done();
            }
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    // Resuming never replays a completed attempt.
    assert_eq!(human_waits, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(read_rows(&config).len(), 3);
}

#[tokio::test]
async fn stale_done_signal_does_not_autocomplete_next_attempt() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = FakeSession::new(vec![PageScript { success: true, ..Default::default() }]);
    let plan = plan_for(&config, "user01", "user01");

    let intents = Arc::new(IntentBoard::new());
    // Raised before the run even starts: stale, must be discarded when the
    // attempt begins.
    intents.mark_done();

    let (reporter, mut events) = Reporter::channel();
    let orchestrator = Orchestrator::new(config.clone(), Arc::clone(&intents), reporter).unwrap();
    let boxed: Box<dyn BrowserSession> = Box::new(SessionHandle(Arc::clone(&session)));
    let run = tokio::spawn(async move { orchestrator.execute(boxed, &plan).await });

    loop {
        match recv(&mut events).await {
            RunEvent::HumanNeeded { .. } => {
                // Give the loop a few poll cycles to prove it is still
                // suspended, then release it for real.
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(
                    !run.is_finished(),
                    "attempt completed off a stale done signal"
                );
                intents.mark_done();
            }
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn stuck_captcha_fails_bounded_not_forever() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = FakeSession::new(vec![PageScript {
        success: true,
        captcha_stuck: true,
        ..Default::default()
    }]);
    let plan = plan_for(&config, "user01", "user01");

    let mut h = start_run(config.clone(), &session, plan);
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.mark_done(),
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.failed, 1);

    let rows = read_rows(&config);
    assert!(rows[1].contains(REASON_NOT_VERIFIED));
}

#[tokio::test]
async fn store_write_failure_surfaces_but_does_not_abort() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    // Parent "directory" is a plain file, so every record write fails.
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"x").unwrap();
    config.data_file = blocker.join("accounts.csv");
    config.backup_file = blocker.join("accounts_backup.csv");

    let session = FakeSession::new(vec![
        PageScript { success: true, ..Default::default() },
        PageScript { success: true, ..Default::default() },
    ]);
    let plan = plan_for(&config, "user01", "user02");

    let mut h = start_run(config.clone(), &session, plan);
    let mut errors = 0;
    let mut recorded = 0;
    loop {
        match recv(&mut h.events).await {
            RunEvent::HumanNeeded { .. } => h.intents.mark_done(),
            RunEvent::Error { .. } => errors += 1,
            RunEvent::AccountRecorded { .. } => recorded += 1,
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = h.run.await.unwrap().unwrap();
    // Outcomes stay logically terminal even without durable records.
    assert_eq!(summary.succeeded, 2);
    assert_eq!(recorded, 2);
    assert_eq!(errors, 2);
    assert!(session.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn run_start_failure_still_closes_browser_and_completes() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Opening the very first tab fails, before any attempt exists.
    let session = FakeSession::failing_at(Vec::new(), 1);
    let plan = plan_for(&config, "user01", "user02");

    let mut h = start_run(config.clone(), &session, plan);
    let mut errors = 0;
    let mut completed = 0;
    loop {
        match tokio::time::timeout(Duration::from_secs(10), h.events.recv())
            .await
            .expect("event channel stalled")
        {
            Some(RunEvent::Error { .. }) => errors += 1,
            Some(RunEvent::Completed) => completed += 1,
            Some(_) => {}
            None => break,
        }
    }

    let err = h.run.await.unwrap().err().expect("run must fail");
    assert!(matches!(err, Error::Driver(_)));
    // Teardown and completion are not skipped by the early failure.
    assert!(session.closed.load(Ordering::SeqCst));
    assert_eq!(completed, 1);
    assert_eq!(errors, 1);
    assert!(read_rows(&config).is_empty());
}

#[tokio::test]
async fn single_shot_start_failure_still_closes_browser_and_completes() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = FakeSession::failing_at(Vec::new(), 1);
    let boxed: Box<dyn BrowserSession> = Box::new(SessionHandle(Arc::clone(&session)));
    let intents = Arc::new(IntentBoard::new());
    let (reporter, mut events) = Reporter::channel();

    let result = mailreg::run::run_single(
        &config,
        boxed,
        intents,
        reporter,
        "user01",
        "Secret1",
        "19921680956",
    )
    .await;
    assert!(matches!(result, Err(Error::Driver(_))));
    assert!(session.closed.load(Ordering::SeqCst));

    let mut errors = 0;
    let mut completed = 0;
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Error { .. } => errors += 1,
            RunEvent::Completed => completed += 1,
            _ => {}
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn skip_before_attempt_start_consumes_slot_without_tab() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.poll_interval_ms = 50;
    let session = FakeSession::new(vec![
        PageScript { success: true, ..Default::default() },
        PageScript { success: true, ..Default::default() },
    ]);
    let plan = plan_for(&config, "user01", "user02");

    let intents = Arc::new(IntentBoard::new());
    // Pause and queue a skip before the loop ever runs: the first slot is
    // consumed with no attempt and no outcome row.
    intents.pause();
    intents.request_skip();

    let (reporter, mut events) = Reporter::channel();
    let orchestrator = Orchestrator::new(config.clone(), Arc::clone(&intents), reporter).unwrap();
    let boxed: Box<dyn BrowserSession> = Box::new(SessionHandle(Arc::clone(&session)));
    let run = tokio::spawn(async move { orchestrator.execute(boxed, &plan).await });
    intents.resume();

    loop {
        match recv(&mut events).await {
            RunEvent::HumanNeeded { .. } => intents.mark_done(),
            RunEvent::Completed => break,
            _ => {}
        }
    }
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    // Only the second email produced a row.
    let rows = read_rows(&config);
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("user02@163.com,"));
}
