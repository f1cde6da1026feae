//! Diagnostics recorder: history ring, state store and health evaluation.

use crate::clock::{ClockRef, SystemClock};
use crate::health::{evaluate, HealthPolicy, HealthReport};
use crate::history::{TransitionEvent, TransitionHistory, DEFAULT_HISTORY_CAPACITY};
use crate::state::{state_keys, StateStore};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use switchyard_events::{emit_event, event_names, EventBusRef, SubscriptionId, Subscribers};
use switchyard_mode::{
    Mode, RuleValidator, SystemSnapshot, SystemStateProviderRef, TransitionOutcome,
    ValidationOutcome, Validator,
};

/// Shared recorder reference.
pub type DiagnosticsRef = Arc<DiagnosticsRecorder>;

/// Collects transition history and system facts, and evaluates health.
///
/// All locks are `std::sync` and held only for the duration of a copy, so
/// readers never wait on an in-flight transition.
pub struct DiagnosticsRecorder {
    clock: ClockRef,
    policy: HealthPolicy,
    history: Mutex<TransitionHistory>,
    state: StateStore,
    providers: RwLock<Vec<SystemStateProviderRef>>,
    validator: RwLock<Arc<dyn Validator>>,
    latest_health: Mutex<Option<HealthReport>>,
    last_outcome: Mutex<Option<TransitionOutcome>>,
    health_subscribers: Subscribers<HealthReport>,
    transition_subscribers: Subscribers<TransitionEvent>,
    event_bus: Option<EventBusRef>,
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl DiagnosticsRecorder {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            policy: HealthPolicy::default(),
            history: Mutex::new(TransitionHistory::with_capacity(history_capacity)),
            state: StateStore::new(),
            providers: RwLock::new(Vec::new()),
            validator: RwLock::new(Arc::new(RuleValidator)),
            latest_health: Mutex::new(None),
            last_outcome: Mutex::new(None),
            health_subscribers: Subscribers::new(),
            transition_subscribers: Subscribers::new(),
            event_bus: None,
        }
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_provider(self, provider: SystemStateProviderRef) -> Self {
        self.add_provider(provider);
        self
    }

    pub fn with_validator(self, validator: Arc<dyn Validator>) -> Self {
        self.set_validator(validator);
        self
    }

    /// Mirror health reports and transition events onto a UI bus.
    pub fn with_event_bus(mut self, bus: EventBusRef) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    // ---- history ---------------------------------------------------------

    /// Append `event` to the ring and notify transition subscribers.
    pub fn record_transition(&self, event: TransitionEvent) {
        let evicted = self
            .history
            .lock()
            .expect("history mutex poisoned")
            .push(event.clone());
        if let Some(evicted) = evicted {
            tracing::trace!(timestamp = %evicted.timestamp, "Evicted oldest transition event");
        }

        self.transition_subscribers.notify(&event);
        if let Some(bus) = &self.event_bus {
            emit_event(bus.as_ref(), event_names::TRANSITION_RECORDED, &event);
        }
    }

    /// Record a full outcome: log its phases, keep it, append its event.
    pub fn record_outcome(&self, outcome: &TransitionOutcome, caller_id: &str) -> TransitionEvent {
        for phase in &outcome.phase_results {
            tracing::debug!(
                phase = %phase.phase,
                success = phase.success,
                duration_ms = phase.duration_ms,
                message = ?phase.message,
                "Transition phase finished"
            );
        }

        if outcome.success {
            tracing::info!(
                from = %outcome.from,
                to = %outcome.to,
                caller = caller_id,
                duration_ms = outcome.duration_ms(),
                "Transition committed"
            );
        } else {
            tracing::warn!(
                from = %outcome.from,
                to = %outcome.to,
                caller = caller_id,
                rolled_back = outcome.rolled_back,
                error = ?outcome.error_message,
                "Transition failed"
            );
        }

        if let Some(last) = outcome.phase_results.last() {
            self.state.set(state_keys::LAST_PHASE, last);
        }
        *self.last_outcome.lock().expect("outcome mutex poisoned") = Some(outcome.clone());

        let event = TransitionEvent {
            timestamp: outcome.completed_at,
            from: outcome.from,
            to: outcome.to,
            success: outcome.success,
            error: outcome.error_message.clone(),
            caller_id: caller_id.to_string(),
        };
        self.record_transition(event.clone());
        event
    }

    /// Most recent first.
    pub fn history(&self) -> Vec<TransitionEvent> {
        self.recent(usize::MAX)
    }

    /// Up to `limit` events, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<TransitionEvent> {
        self.history
            .lock()
            .expect("history mutex poisoned")
            .recent(limit)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().expect("history mutex poisoned").len()
    }

    pub fn history_capacity(&self) -> usize {
        self.history.lock().expect("history mutex poisoned").capacity()
    }

    pub fn last_outcome(&self) -> Option<TransitionOutcome> {
        self.last_outcome
            .lock()
            .expect("outcome mutex poisoned")
            .clone()
    }

    // ---- state -----------------------------------------------------------

    pub fn set_state<T: Serialize>(&self, key: &str, value: T) {
        self.state.set(key, value);
    }

    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state.get(key)
    }

    pub fn state_value(&self, key: &str) -> Option<serde_json::Value> {
        self.state.get_raw(key)
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // ---- observations ----------------------------------------------------

    /// Overlay `provider`'s observations on every snapshot taken from now on.
    pub fn add_provider(&self, provider: SystemStateProviderRef) {
        self.providers
            .write()
            .expect("providers lock poisoned")
            .push(provider);
    }

    /// Validator used for the consistency part of health checks.
    pub fn set_validator(&self, validator: Arc<dyn Validator>) {
        *self.validator.write().expect("validator lock poisoned") = validator;
    }

    pub fn validator(&self) -> Arc<dyn Validator> {
        Arc::clone(&self.validator.read().expect("validator lock poisoned"))
    }

    /// Published flags overlaid with every provider's observations.
    ///
    /// `current_mode` is left unset: the orchestrator decides which mode a
    /// snapshot is expected to describe.
    pub fn system_snapshot(&self) -> SystemSnapshot {
        let mut snapshot = self.published_snapshot();
        for provider in self.providers.read().expect("providers lock poisoned").iter() {
            provider.fill_snapshot(&mut snapshot);
        }
        snapshot
    }

    fn published_snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            suppression_enabled: self.state.get(state_keys::SUPPRESSION_ENABLED),
            driver_connected: self.state.get(state_keys::DRIVER_CONNECTED),
            device_connected: self.state.get(state_keys::DEVICE_CONNECTED),
            passthrough_running: self.state.get(state_keys::PASSTHROUGH_RUNNING),
            last_transition_at: self.state.get(state_keys::LAST_TRANSITION_AT),
            captured_at: self.clock.now(),
            ..SystemSnapshot::default()
        }
    }

    /// Snapshot for consistency audits: the committed mode is expected and
    /// the registry's last reported mode is an observer.
    pub fn consistency_snapshot(&self) -> SystemSnapshot {
        let mut snapshot = self.system_snapshot();
        snapshot.current_mode = self.state.get::<Mode>(state_keys::CURRENT_MODE);
        if let Some(reported) = self.state.get::<Mode>(state_keys::REGISTRY_MODE) {
            snapshot.observe("registry", reported);
        }
        snapshot
    }

    // ---- health ----------------------------------------------------------

    /// Audit the consistency snapshot with the configured validator.
    pub fn audit_consistency(&self) -> ValidationOutcome {
        self.validator()
            .validate_system_state(&self.consistency_snapshot())
    }

    /// Evaluate health now, store the report and publish it.
    pub fn run_health_check(&self) -> HealthReport {
        let consistency = self.audit_consistency();
        let report = {
            let history = self.history.lock().expect("history mutex poisoned");
            evaluate(&history, &consistency, &self.policy, self.clock.now())
        };

        if report.is_healthy {
            tracing::debug!(issues = report.issues.len(), "Health check passed");
        } else {
            tracing::warn!(issues = ?report.issues, "Health check failed");
        }

        *self.latest_health.lock().expect("health mutex poisoned") = Some(report.clone());
        self.health_subscribers.notify(&report);
        if let Some(bus) = &self.event_bus {
            emit_event(bus.as_ref(), event_names::HEALTH_REPORT, &report);
        }
        report
    }

    pub fn latest_health(&self) -> Option<HealthReport> {
        self.latest_health
            .lock()
            .expect("health mutex poisoned")
            .clone()
    }

    // ---- subscriptions ---------------------------------------------------

    pub fn subscribe_health<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HealthReport) + Send + Sync + 'static,
    {
        self.health_subscribers.subscribe(callback)
    }

    pub fn subscribe_transitions<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.transition_subscribers.subscribe(callback)
    }

    /// Remove a health or transition subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.health_subscribers.unsubscribe(id) || self.transition_subscribers.unsubscribe(id)
    }

    pub fn clear_subscribers(&self) {
        self.health_subscribers.clear();
        self.transition_subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;
    use switchyard_mode::{PermissiveValidator, SharedObservations};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_events::InMemoryEventBus;
    use switchyard_mode::TransitionFailure;

    fn failed_outcome(at: DateTime<Utc>) -> TransitionOutcome {
        let mut outcome = TransitionOutcome::rejected(
            Mode::Native,
            Mode::ConvertedOutput,
            TransitionFailure::Execute {
                message: "driver missing".into(),
            },
        );
        outcome.started_at = at;
        outcome.completed_at = at;
        outcome
    }

    #[test]
    fn test_failure_threshold_with_manual_clock() {
        let clock = Arc::new(ManualClock::default());
        let recorder = DiagnosticsRecorder::default().with_clock(clock.clone());

        for _ in 0..3 {
            recorder.record_outcome(&failed_outcome(clock.now()), "test");
            clock.advance(Duration::seconds(30));
        }
        assert!(recorder.run_health_check().is_healthy);

        recorder.record_outcome(&failed_outcome(clock.now()), "test");
        let report = recorder.run_health_check();
        assert!(!report.is_healthy);
        assert!(report.issues[0].contains('4'));

        // Five minutes later the window is empty again.
        clock.advance(Duration::minutes(6));
        assert!(recorder.run_health_check().is_healthy);
    }

    #[test]
    fn test_history_bounded_at_capacity() {
        let recorder = DiagnosticsRecorder::default();
        for n in 0..150 {
            recorder.record_transition(TransitionEvent {
                timestamp: Utc::now(),
                from: Mode::Native,
                to: Mode::ConvertedOutput,
                success: true,
                error: None,
                caller_id: format!("caller-{n}"),
            });
        }

        assert_eq!(recorder.history_len(), 100);
        let history = recorder.history();
        assert_eq!(history[0].caller_id, "caller-149");
        assert_eq!(history[99].caller_id, "caller-50");
    }

    #[test]
    fn test_record_outcome_keeps_last_and_notifies() {
        let recorder = DiagnosticsRecorder::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        recorder.subscribe_transitions(move |event| {
            assert!(!event.success);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let event = recorder.record_outcome(&failed_outcome(Utc::now()), "hotkey");
        assert_eq!(event.caller_id, "hotkey");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(recorder.last_outcome().is_some());
    }

    #[test]
    fn test_health_report_published_every_run() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = DiagnosticsRecorder::default().with_event_bus(bus.clone());
        let reports = Arc::new(AtomicUsize::new(0));
        let reports_clone = Arc::clone(&reports);
        let id = recorder.subscribe_health(move |_| {
            reports_clone.fetch_add(1, Ordering::SeqCst);
        });

        recorder.run_health_check();
        recorder.run_health_check();
        assert_eq!(reports.load(Ordering::SeqCst), 2);
        assert_eq!(bus.events_for(event_names::HEALTH_REPORT).len(), 2);
        assert!(recorder.latest_health().is_some());

        assert!(recorder.unsubscribe(id));
        recorder.run_health_check();
        assert_eq!(reports.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_reads_published_flags() {
        let recorder = DiagnosticsRecorder::default();
        recorder.set_state(state_keys::DRIVER_CONNECTED, false);
        recorder.set_state(state_keys::CURRENT_MODE, Mode::ConvertedOutput);

        let snapshot = recorder.system_snapshot();
        assert_eq!(snapshot.driver_connected, Some(false));
        assert_eq!(snapshot.device_connected, None);
        assert_eq!(snapshot.current_mode, None);

        let audit = recorder.consistency_snapshot();
        assert_eq!(audit.current_mode, Some(Mode::ConvertedOutput));
    }

    #[test]
    fn test_health_check_sees_provider_observations() {
        let observations = SharedObservations::new();
        observations.set_suppression(true);
        let recorder =
            DiagnosticsRecorder::default().with_provider(Arc::new(observations.clone()));
        recorder.set_state(state_keys::CURRENT_MODE, Mode::HardwarePassthrough);

        let report = recorder.run_health_check();
        assert!(report.is_healthy);
        assert!(report
            .issues
            .iter()
            .any(|i| i.starts_with("advisory:") && i.contains("suppression")));

        observations.set_suppression(false);
        assert!(recorder.run_health_check().issues.is_empty());
    }

    #[test]
    fn test_health_check_uses_configured_validator() {
        let recorder =
            DiagnosticsRecorder::default().with_validator(Arc::new(PermissiveValidator));
        recorder.set_state(state_keys::CURRENT_MODE, Mode::Native);
        recorder.set_state(state_keys::REGISTRY_MODE, Mode::HardwarePassthrough);

        assert!(recorder.run_health_check().issues.is_empty());
    }

    #[test]
    fn test_registry_drift_is_advisory() {
        let recorder = DiagnosticsRecorder::default();
        recorder.set_state(state_keys::CURRENT_MODE, Mode::Native);
        recorder.set_state(state_keys::REGISTRY_MODE, Mode::HardwarePassthrough);

        let report = recorder.run_health_check();
        assert!(report.is_healthy);
        assert!(report.issues.iter().any(|i| i.contains("disagree")));
    }
}
