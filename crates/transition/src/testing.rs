//! Instrumented in-memory registry for tests.

use crate::error::HandlerError;
use crate::registry::ModeHandlerRegistry;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use switchyard_mode::Mode;
use tokio::sync::watch;

/// Registry whose behaviour is scripted by the test.
///
/// Tracks how many `apply` calls overlap so tests can assert that the
/// guard serializes transitions.
pub struct FakeRegistry {
    applied: watch::Sender<Mode>,
    apply_delay: Mutex<Duration>,
    failing: Mutex<HashSet<Mode>>,
    fail_prepare: AtomicBool,
    panic_on_apply: AtomicBool,
    ignore_apply: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prepare_calls: AtomicUsize,
    apply_calls: Mutex<Vec<Mode>>,
}

/// Decrements the in-flight counter even when the apply future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self::new(Mode::Native)
    }
}

impl FakeRegistry {
    pub fn new(initial: Mode) -> Self {
        let (applied, _) = watch::channel(initial);
        Self {
            applied,
            apply_delay: Mutex::new(Duration::ZERO),
            failing: Mutex::new(HashSet::new()),
            fail_prepare: AtomicBool::new(false),
            panic_on_apply: AtomicBool::new(false),
            ignore_apply: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            prepare_calls: AtomicUsize::new(0),
            apply_calls: Mutex::new(Vec::new()),
        }
    }

    /// Every `apply` sleeps this long before taking effect.
    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock().expect("fake registry mutex poisoned") = delay;
    }

    /// Make `apply(mode)` fail.
    pub fn fail_mode(&self, mode: Mode) {
        self.failing
            .lock()
            .expect("fake registry mutex poisoned")
            .insert(mode);
    }

    pub fn clear_failures(&self) {
        self.failing
            .lock()
            .expect("fake registry mutex poisoned")
            .clear();
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn set_panic_on_apply(&self, panic: bool) {
        self.panic_on_apply.store(panic, Ordering::SeqCst);
    }

    /// Report success from `apply` without changing the applied mode.
    pub fn set_ignore_apply(&self, ignore: bool) {
        self.ignore_apply.store(ignore, Ordering::SeqCst);
    }

    /// Change the applied mode behind the orchestrator's back.
    pub fn set_applied(&self, mode: Mode) {
        self.applied.send_replace(mode);
    }

    pub fn apply_calls(&self) -> Vec<Mode> {
        self.apply_calls
            .lock()
            .expect("fake registry mutex poisoned")
            .clone()
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `apply` calls that ever overlapped.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModeHandlerRegistry for FakeRegistry {
    async fn prepare(&self, _from: Mode, to: Mode) -> Result<(), HandlerError> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(HandlerError::failed(to, "prepare refused"));
        }
        Ok(())
    }

    async fn apply(&self, mode: Mode) -> Result<(), HandlerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.apply_calls
            .lock()
            .expect("fake registry mutex poisoned")
            .push(mode);

        let delay = *self.apply_delay.lock().expect("fake registry mutex poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.panic_on_apply.load(Ordering::SeqCst) {
            panic!("fake handler panicked applying {mode}");
        }
        let failing = self
            .failing
            .lock()
            .expect("fake registry mutex poisoned")
            .contains(&mode);
        if failing {
            return Err(HandlerError::failed(mode, "scripted failure"));
        }
        if !self.ignore_apply.load(Ordering::SeqCst) {
            self.applied.send_replace(mode);
        }
        Ok(())
    }

    fn current_applied_mode(&self) -> Mode {
        *self.applied.borrow()
    }

    fn mode_changes(&self) -> Option<watch::Receiver<Mode>> {
        Some(self.applied.subscribe())
    }
}
