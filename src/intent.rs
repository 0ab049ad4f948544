//! Operator intents and run observability.
//!
//! The controller (GUI, stdin loop, test harness) runs on its own task and
//! communicates with the orchestrator only through this module: intent
//! flags the orchestrator polls once per loop iteration, and a
//! one-directional event channel the controller drains on its own schedule.
//!
//! Clearing discipline: each flag has exactly one clearer — the
//! orchestrator — via the `take_*` methods, so a signal is never lost to a
//! second reader or consumed twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct IntentBoard {
    paused: AtomicBool,
    skip_next: AtomicBool,
    mark_done: AtomicBool,
    switch_tab: Mutex<Option<usize>>,
}

impl IntentBoard {
    pub fn new() -> Self {
        Self::default()
    }

    // Controller side.

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Skip the current email and move on.
    pub fn request_skip(&self) {
        self.skip_next.store(true, Ordering::SeqCst);
    }

    /// The human has finished manual verification for the active attempt.
    pub fn mark_done(&self) {
        self.mark_done.store(true, Ordering::SeqCst);
    }

    /// Bring the tab with this index to the front. A later request
    /// overwrites an unserviced earlier one.
    pub fn request_switch_tab(&self, index: usize) {
        if let Ok(mut slot) = self.switch_tab.lock() {
            *slot = Some(index);
        }
    }

    // Orchestrator side.

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn take_skip(&self) -> bool {
        self.skip_next.swap(false, Ordering::SeqCst)
    }

    pub fn take_done(&self) -> bool {
        self.mark_done.swap(false, Ordering::SeqCst)
    }

    pub fn take_switch_tab(&self) -> Option<usize> {
        self.switch_tab.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Progress and status events flowing from the orchestrator to the
/// controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// The attempt for `email` changed state (state name as text, since the
    /// controller only displays it).
    StateChanged { email: String, state: String },
    /// Manual completion is required: captcha, agreement, submit, phone/QR.
    HumanNeeded { email: String },
    /// `index` of `total` attempts have finished.
    Progress { index: usize, total: usize },
    /// A terminal outcome was classified (and its durable write attempted).
    AccountRecorded { email: String, success: bool },
    /// A run-level error was caught at the orchestrator boundary.
    Error { message: String },
    /// The run finished and cleanup ran. Emitted exactly once.
    Completed,
}

pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

/// Sender half of the event channel. A vanished controller is not an
/// error; sends to a closed channel are dropped silently.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Reporter {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything (single-shot CLI mode).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn state_changed(&self, email: &str, state: impl Into<String>) {
        self.send(RunEvent::StateChanged {
            email: email.to_string(),
            state: state.into(),
        });
    }
}
