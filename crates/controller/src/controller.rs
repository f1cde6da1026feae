//! The mode controller: the one type UI code talks to.

use crate::config::ControllerConfig;
use crate::drain::InFlight;
use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_diagnostics::{
    state_keys, ClockRef, DiagnosticsRecorder, DiagnosticsRef, HealthMonitor, HealthReport,
    TransitionEvent,
};
use switchyard_events::{
    emit_event, event_names, EventBusRef, ModeChangedEvent, SubscriptionId, Subscribers,
};
use switchyard_mode::{
    Mode, SystemStateProviderRef, TransitionFailure, TransitionOutcome, TransitionPhase,
    ValidationOutcome, Validator,
};
use switchyard_storage::{LoadSource, ModeRepositoryRef, ModeStateStore};
use switchyard_transition::{
    AcquireError, ConcurrencyGuard, ModeHandlerRegistryRef, TransitionOrchestrator,
    TransitionRequest,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Caller id used when a switch names none.
pub const DEFAULT_CALLER: &str = "api";

/// What a switch aims for, resolved once the transition slot is held.
#[derive(Debug, Clone, Copy)]
enum Target {
    Exactly(Mode),
    Next,
}

impl Target {
    fn resolve(self, current: Mode) -> Mode {
        match self {
            Target::Exactly(mode) => mode,
            Target::Next => current.next(),
        }
    }
}

/// Per-call options for [`ModeController::switch_with`].
#[derive(Debug, Clone)]
pub struct SwitchOptions {
    /// Who asked, e.g. "tray" or "hotkey". Recorded in history.
    pub caller_id: String,
    pub cancel: Option<CancellationToken>,
    /// Overall transition deadline; the configured default when `None`.
    pub timeout: Option<Duration>,
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self::caller(DEFAULT_CALLER)
    }
}

impl SwitchOptions {
    pub fn caller(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            cancel: None,
            timeout: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Serializable view of the controller for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub current_mode: Mode,
    pub persisted_mode: Option<Mode>,
    pub is_persisted_match: bool,
    pub suppression_active: Option<bool>,
    pub transition_in_progress: bool,
    pub history_len: usize,
    pub recent_failures: usize,
    pub last_transition: Option<TransitionEvent>,
    pub latest_health: Option<HealthReport>,
    pub disposed: bool,
}

/// Builder for [`ModeController`].
pub struct ModeControllerBuilder {
    registry: ModeHandlerRegistryRef,
    store: ModeRepositoryRef,
    config: ControllerConfig,
    diagnostics: Option<DiagnosticsRef>,
    validator: Option<Arc<dyn Validator>>,
    providers: Vec<SystemStateProviderRef>,
    event_bus: Option<EventBusRef>,
    clock: Option<ClockRef>,
}

impl ModeControllerBuilder {
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing recorder instead of building one from the config.
    pub fn diagnostics(mut self, diagnostics: DiagnosticsRef) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn provider(mut self, provider: SystemStateProviderRef) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn event_bus(mut self, bus: EventBusRef) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ModeController {
        let config = self.config;

        let diagnostics = self.diagnostics.unwrap_or_else(|| {
            let mut recorder = DiagnosticsRecorder::new(config.history_capacity)
                .with_policy(config.health_policy());
            if let Some(clock) = self.clock {
                recorder = recorder.with_clock(clock);
            }
            if let Some(bus) = &self.event_bus {
                recorder = recorder.with_event_bus(Arc::clone(bus));
            }
            Arc::new(recorder)
        });

        let teardown = CancellationToken::new();
        let mut orchestrator = TransitionOrchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&diagnostics),
        )
        .with_config(config.orchestrator())
        .with_shutdown_token(teardown.clone());
        if let Some(validator) = self.validator {
            orchestrator = orchestrator.with_validator(validator);
        }
        for provider in self.providers {
            orchestrator = orchestrator.with_provider(provider);
        }

        ModeController {
            orchestrator,
            registry: self.registry,
            store: self.store,
            diagnostics,
            guard: ConcurrencyGuard::new(),
            config,
            mode_changed: Subscribers::new(),
            event_bus: self.event_bus,
            teardown,
            disposed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            in_flight: InFlight::default(),
            monitor: HealthMonitor::new(),
            watcher: Mutex::new(None),
        }
    }
}

/// Switches, queries and observes the operating mode.
///
/// At most one transition runs at a time; concurrent callers wait up to
/// the configured bound. Queries never wait on a transition.
pub struct ModeController {
    orchestrator: TransitionOrchestrator,
    registry: ModeHandlerRegistryRef,
    store: ModeRepositoryRef,
    diagnostics: DiagnosticsRef,
    guard: ConcurrencyGuard,
    config: ControllerConfig,
    mode_changed: Subscribers<ModeChangedEvent>,
    event_bus: Option<EventBusRef>,
    teardown: CancellationToken,
    disposed: AtomicBool,
    started: AtomicBool,
    initialized: AtomicBool,
    in_flight: InFlight,
    monitor: HealthMonitor,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ModeController {
    pub fn builder(
        registry: ModeHandlerRegistryRef,
        store: ModeRepositoryRef,
    ) -> ModeControllerBuilder {
        ModeControllerBuilder {
            registry,
            store,
            config: ControllerConfig::default(),
            diagnostics: None,
            validator: None,
            providers: Vec::new(),
            event_bus: None,
            clock: None,
        }
    }

    /// Builder with a file store at `config.state_file` under `root`.
    pub fn open(
        root: &Path,
        config: ControllerConfig,
        registry: ModeHandlerRegistryRef,
    ) -> Result<ModeControllerBuilder> {
        config.validate()?;
        let store = ModeStateStore::open(root, &config.state_file)?;
        tracing::info!(path = ?store.path(), "Mode state file");
        Ok(Self::builder(registry, Arc::new(store)).config(config))
    }

    // ---- commands --------------------------------------------------------

    /// Switch to `mode`. Returns true if `mode` is current afterwards.
    pub async fn switch(&self, mode: Mode) -> bool {
        self.switch_with(mode, SwitchOptions::default()).await.success
    }

    /// Switch to `mode` and return the detailed outcome.
    pub async fn switch_with(&self, mode: Mode, options: SwitchOptions) -> TransitionOutcome {
        self.run_switch(Target::Exactly(mode), options).await
    }

    /// Advance to the next mode in toggle order; returns the mode current
    /// after the attempt.
    ///
    /// The next mode is resolved once the transition slot is held, so
    /// concurrent toggles each advance one step.
    pub async fn toggle(&self) -> Mode {
        self.run_switch(Target::Next, SwitchOptions::caller("toggle")).await;
        self.current_mode()
    }

    async fn run_switch(&self, target: Target, options: SwitchOptions) -> TransitionOutcome {
        let caller = options.caller_id;
        if self.is_disposed() {
            let from = self.current_mode();
            let to = target.resolve(from);
            tracing::warn!(to = %to, caller = %caller, "Switch requested after shutdown");
            return TransitionOutcome::rejected(from, to, TransitionFailure::Disposed);
        }

        let _in_flight = self.in_flight.enter();
        let cancel = options.cancel.unwrap_or_default();

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(None),
            result = self.guard.acquire_detailed(self.config.switch_wait()) => result.map_err(Some),
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(None) => {
                let phase = TransitionPhase::Acquire;
                return self.reject(target, TransitionFailure::Cancelled { phase }, &caller);
            }
            Err(Some(AcquireError::Closed)) => {
                let from = self.current_mode();
                return TransitionOutcome::rejected(
                    from,
                    target.resolve(from),
                    TransitionFailure::Disposed,
                );
            }
            Err(Some(AcquireError::TimedOut { waited_ms })) => {
                tracing::warn!(caller = %caller, waited_ms, "Transition slot busy");
                return self.reject(target, TransitionFailure::Busy { waited_ms }, &caller);
            }
        };

        let from = self.current_mode();
        let mode = target.resolve(from);
        if from == mode {
            tracing::debug!(mode = %mode, caller = %caller, "Already in requested mode");
            return TransitionOutcome::no_op(mode);
        }

        let mut request = TransitionRequest::new(from, mode)
            .with_caller(caller.clone())
            .with_cancel(cancel);
        if let Some(timeout) = options.timeout {
            request = request.with_timeout(timeout);
        }

        let outcome = self.orchestrator.execute_transition(&permit, request).await;
        if outcome.changed_mode() {
            self.publish_mode_changed(from, mode, &caller);
        }
        drop(permit);
        outcome
    }

    /// Apply the persisted mode. Runs once; later calls report whether the
    /// persisted mode is applied without switching again.
    pub async fn initialize_from_persistence(&self) -> bool {
        if self.initialized.swap(true, Ordering::AcqRel) {
            tracing::debug!("Mode already initialized from persistence");
            return self.is_persisted_match();
        }

        let loaded = self.store.load_detailed();
        tracing::info!(mode = %loaded.mode, source = ?loaded.source, "Restoring persisted mode");

        let outcome = self
            .switch_with(loaded.mode, SwitchOptions::caller("persistence"))
            .await;
        let current = self.current_mode();
        self.diagnostics.set_state(state_keys::CURRENT_MODE, current);

        if !outcome.success {
            // The file keeps the saved mode for the next start.
            tracing::warn!(
                mode = %loaded.mode,
                error = ?outcome.error_message,
                "Could not restore persisted mode"
            );
            return false;
        }

        let cold_start = matches!(
            loaded.source,
            LoadSource::Missing | LoadSource::Unrecognized { .. }
        );
        let needs_write = cold_start && self.store.last_persisted() != Some(current);
        if needs_write && !self.store.persist(current) {
            tracing::warn!(mode = %current, "Initial mode not persisted");
        }
        true
    }

    fn reject(
        &self,
        target: Target,
        failure: TransitionFailure,
        caller: &str,
    ) -> TransitionOutcome {
        let from = self.current_mode();
        let outcome = TransitionOutcome::rejected(from, target.resolve(from), failure);
        self.diagnostics.record_outcome(&outcome, caller);
        outcome
    }

    fn publish_mode_changed(&self, from: Mode, to: Mode, caller: &str) {
        let event = ModeChangedEvent::new(from, to, caller, self.diagnostics.now());
        tracing::info!(from = %from, to = %to, caller = caller, "Mode changed");
        self.mode_changed.notify(&event);
        if let Some(bus) = &self.event_bus {
            emit_event(bus.as_ref(), event_names::MODE_CHANGED, &event);
        }
    }

    // ---- queries ---------------------------------------------------------

    /// The mode the handlers have applied.
    pub fn current_mode(&self) -> Mode {
        self.registry.current_applied_mode()
    }

    /// Whether the last persisted mode equals the current one.
    pub fn is_persisted_match(&self) -> bool {
        self.store.last_persisted() == Some(self.current_mode())
    }

    pub fn is_transition_in_progress(&self) -> bool {
        self.guard.is_held()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether raw input is suppressed, if anyone reports it.
    pub fn suppression_active(&self) -> Option<bool> {
        self.orchestrator
            .snapshot(self.current_mode())
            .suppression_enabled
    }

    /// Most recent first.
    pub fn recent_transitions(&self, limit: usize) -> Vec<TransitionEvent> {
        self.diagnostics.recent(limit)
    }

    pub fn latest_health(&self) -> Option<HealthReport> {
        self.diagnostics.latest_health()
    }

    pub fn last_outcome(&self) -> Option<TransitionOutcome> {
        self.diagnostics.last_outcome()
    }

    pub fn state_value(&self, key: &str) -> Option<serde_json::Value> {
        self.diagnostics.state_value(key)
    }

    /// Audit the current system state without taking the transition slot.
    pub fn validate_system_state(&self) -> ValidationOutcome {
        let expected = self
            .diagnostics
            .get_state::<Mode>(state_keys::CURRENT_MODE)
            .unwrap_or_else(|| self.current_mode());
        self.orchestrator
            .validator()
            .validate_system_state(&self.orchestrator.snapshot(expected))
    }

    pub fn diagnostics_summary(&self) -> DiagnosticsSummary {
        let since = self.diagnostics.now() - self.diagnostics.policy().failure_window;
        let history = self.diagnostics.history();
        DiagnosticsSummary {
            current_mode: self.current_mode(),
            persisted_mode: self.store.last_persisted(),
            is_persisted_match: self.is_persisted_match(),
            suppression_active: self.suppression_active(),
            transition_in_progress: self.is_transition_in_progress(),
            history_len: history.len(),
            recent_failures: history
                .iter()
                .filter(|e| !e.success && e.timestamp >= since)
                .count(),
            last_transition: history.first().cloned(),
            latest_health: self.latest_health(),
            disposed: self.is_disposed(),
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticsRef {
        &self.diagnostics
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ---- subscriptions ---------------------------------------------------

    /// Called once per successful, state-changing switch, after persistence.
    pub fn subscribe_mode_changed<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&ModeChangedEvent) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.mode_changed.subscribe(callback))
    }

    pub fn subscribe_health<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&HealthReport) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.diagnostics.subscribe_health(callback))
    }

    pub fn subscribe_transitions<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.diagnostics.subscribe_transitions(callback))
    }

    /// Remove any subscription made through this controller.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.mode_changed.unsubscribe(id) || self.diagnostics.unsubscribe(id)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ControllerError::Disposed)
        } else {
            Ok(())
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start the health monitor and, if the registry publishes changes, a
    /// watcher mirroring them into diagnostics. Must run inside a tokio
    /// runtime. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.monitor
            .start(Arc::clone(&self.diagnostics), self.config.health_interval());

        let current = self.current_mode();
        self.diagnostics.set_state(state_keys::REGISTRY_MODE, current);

        if let Some(mut changes) = self.registry.mode_changes() {
            let diagnostics = Arc::clone(&self.diagnostics);
            let token = self.teardown.child_token();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        changed = changes.changed() => {
                            if changed.is_err() {
                                tracing::debug!("Registry change stream closed");
                                break;
                            }
                            let reported = *changes.borrow_and_update();
                            diagnostics.set_state(state_keys::REGISTRY_MODE, reported);

                            let committed = diagnostics.get_state::<Mode>(state_keys::CURRENT_MODE);
                            if committed.is_some_and(|committed| committed != reported) {
                                tracing::debug!(
                                    reported = %reported,
                                    committed = ?committed,
                                    "Registry reports a mode other than the committed one"
                                );
                            }
                        }
                    }
                }
            });
            *self.watcher.lock().expect("watcher mutex poisoned") = Some(handle);
        }

        tracing::info!(mode = %current, "Mode controller started");
        Ok(())
    }

    /// Tear down: abort in-flight transitions, refuse new ones, stop
    /// background tasks and wait (bounded) for callers to drain. Idempotent.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down mode controller");

        self.teardown.cancel();
        self.guard.close();
        self.monitor.shutdown().await;

        let watcher = self.watcher.lock().expect("watcher mutex poisoned").take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                tracing::warn!(error = %e, "Registry watcher ended abnormally");
            }
        }

        if !self.in_flight.wait_drained(self.config.shutdown_drain()).await {
            tracing::warn!(
                remaining = self.in_flight.count(),
                "In-flight switches did not finish before shutdown deadline"
            );
        }

        self.mode_changed.clear();
        tracing::info!("Mode controller shut down");
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.teardown.cancel();
        self.guard.close();
    }
}
