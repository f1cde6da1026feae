//! Integration tests for the mode controller.
//!
//! Each test gets its own application root and an instrumented registry.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_controller::{
    ConfigError, ControllerConfig, ControllerError, ModeController, ModeControllerBuilder,
    SwitchOptions,
};
use switchyard_diagnostics::{state_keys, ManualClock};
use switchyard_events::{event_names, InMemoryEventBus, ModeChangedEvent};
use switchyard_mode::{Mode, SharedObservations, TransitionFailure, TransitionPhase};
use switchyard_transition::testing::FakeRegistry;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    dir: TempDir,
    registry: Arc<FakeRegistry>,
    controller: Arc<ModeController>,
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        settle_delay_ms: 0,
        ..ControllerConfig::default()
    }
}

fn fixture() -> Fixture {
    fixture_with(test_config(), |builder| builder)
}

fn fixture_with(
    config: ControllerConfig,
    customize: impl FnOnce(ModeControllerBuilder) -> ModeControllerBuilder,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    fixture_in(dir, Mode::Native, config, customize)
}

fn fixture_in(
    dir: TempDir,
    initial: Mode,
    config: ControllerConfig,
    customize: impl FnOnce(ModeControllerBuilder) -> ModeControllerBuilder,
) -> Fixture {
    let registry = Arc::new(FakeRegistry::new(initial));
    let builder = ModeController::open(dir.path(), config, registry.clone()).unwrap();
    let controller = Arc::new(customize(builder).build());
    Fixture {
        dir,
        registry,
        controller,
    }
}

fn record_changes(controller: &ModeController) -> Arc<Mutex<Vec<(Mode, Mode)>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    controller
        .subscribe_mode_changed(move |event| sink.lock().unwrap().push((event.from, event.to)))
        .unwrap();
    changes
}

// =============================================================================
// Switching
// =============================================================================

mod switching {
    use super::*;

    #[tokio::test]
    async fn test_native_to_hardware_passthrough() {
        let f = fixture();
        let changes = record_changes(&f.controller);

        assert!(f.controller.switch(Mode::HardwarePassthrough).await);

        assert_eq!(f.controller.current_mode(), Mode::HardwarePassthrough);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![(Mode::Native, Mode::HardwarePassthrough)]
        );
        let content = fs::read_to_string(f.dir.path().join("mode.txt")).unwrap();
        assert_eq!(content.trim(), "HardwarePassthrough");
        assert!(f.controller.is_persisted_match());
    }

    #[tokio::test]
    async fn test_switch_to_current_mode_is_silent_success() {
        let f = fixture();
        let changes = record_changes(&f.controller);

        assert!(f.controller.switch(f.controller.current_mode()).await);

        assert!(changes.lock().unwrap().is_empty());
        assert!(f.registry.apply_calls().is_empty());
        assert!(f.controller.recent_transitions(10).is_empty());
    }

    #[tokio::test]
    async fn test_execute_failure_leaves_mode_unchanged() {
        let f = fixture();
        let changes = record_changes(&f.controller);
        f.registry.fail_mode(Mode::ConvertedOutput);

        let outcome = f
            .controller
            .switch_with(Mode::ConvertedOutput, SwitchOptions::caller("tray"))
            .await;

        assert!(!outcome.success);
        assert!(outcome.rolled_back);
        assert_eq!(f.controller.current_mode(), Mode::Native);
        assert!(changes.lock().unwrap().is_empty());

        let recent = f.controller.recent_transitions(1);
        assert_eq!(recent[0].caller_id, "tray");
        assert!(!recent[0].success);
    }

    #[tokio::test]
    async fn test_toggle_cycles_through_every_mode() {
        let f = fixture();

        assert_eq!(f.controller.toggle().await, Mode::ConvertedOutput);
        assert_eq!(f.controller.toggle().await, Mode::HardwarePassthrough);
        assert_eq!(f.controller.toggle().await, Mode::Native);
    }

    #[tokio::test]
    async fn test_toggle_failure_returns_unchanged_mode() {
        let f = fixture();
        f.registry.fail_mode(Mode::ConvertedOutput);

        assert_eq!(f.controller.toggle().await, Mode::Native);
    }

    #[tokio::test]
    async fn test_event_bus_receives_mode_changed() {
        let bus = Arc::new(InMemoryEventBus::new());
        let bus_ref = bus.clone();
        let f = fixture_with(test_config(), move |b| b.event_bus(bus_ref));

        f.controller.switch(Mode::ConvertedOutput).await;

        let events: Vec<ModeChangedEvent> = bus.decoded(event_names::MODE_CHANGED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, Mode::ConvertedOutput);
        assert_eq!(events[0].caller_id, "api");
        assert_eq!(bus.events_for(event_names::TRANSITION_RECORDED).len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let f = fixture();
        f.controller
            .subscribe_mode_changed(|_| panic!("subscriber failure"))
            .unwrap();
        let changes = record_changes(&f.controller);

        assert!(f.controller.switch(Mode::ConvertedOutput).await);
        assert_eq!(changes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let id = f
            .controller
            .subscribe_mode_changed(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        f.controller.switch(Mode::ConvertedOutput).await;
        assert!(f.controller.unsubscribe(id));
        f.controller.switch(Mode::Native).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancel_before_acquire() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f
            .controller
            .switch_with(
                Mode::ConvertedOutput,
                SwitchOptions::caller("hotkey").with_cancel(cancel),
            )
            .await;

        assert_eq!(
            outcome.failure,
            Some(TransitionFailure::Cancelled {
                phase: TransitionPhase::Acquire
            })
        );
        assert!(f.registry.apply_calls().is_empty());
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_switches_never_overlap() {
        let f = fixture();
        f.registry.set_apply_delay(Duration::from_millis(5));
        let targets = [Mode::ConvertedOutput, Mode::HardwarePassthrough];

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let controller = Arc::clone(&f.controller);
                let target = targets[n % 2];
                tokio::spawn(async move { controller.switch(target).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(f.registry.max_in_flight(), 1);
        assert!(targets.contains(&f.controller.current_mode()));
        assert!(!f.controller.is_transition_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gives_up_after_bounded_wait() {
        let config = ControllerConfig {
            switch_wait_ms: 50,
            ..test_config()
        };
        let f = fixture_with(config, |b| b);
        f.registry.set_apply_delay(Duration::from_secs(1));

        let (first, second) = tokio::join!(
            f.controller.switch(Mode::ConvertedOutput),
            f.controller
                .switch_with(Mode::HardwarePassthrough, SwitchOptions::caller("late")),
        );

        assert!(first);
        assert!(matches!(
            second.failure,
            Some(TransitionFailure::Busy { .. })
        ));
        assert_eq!(f.controller.current_mode(), Mode::ConvertedOutput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_toggles_each_advance_one_step() {
        let f = fixture();
        f.registry.set_apply_delay(Duration::from_millis(100));

        let (first, second) = tokio::join!(f.controller.toggle(), f.controller.toggle());

        assert_eq!(first, Mode::ConvertedOutput);
        assert_eq!(second, Mode::HardwarePassthrough);
        assert_eq!(
            f.registry.apply_calls(),
            vec![Mode::ConvertedOutput, Mode::HardwarePassthrough]
        );
        assert_eq!(f.controller.current_mode(), Mode::HardwarePassthrough);
    }
}

// =============================================================================
// Persistence
// =============================================================================

mod persistence {
    use super::*;

    #[tokio::test]
    async fn test_cold_start_is_native_and_written() {
        let f = fixture();

        assert!(f.controller.initialize_from_persistence().await);

        assert_eq!(f.controller.current_mode(), Mode::Native);
        assert!(f.registry.apply_calls().is_empty());
        let content = fs::read_to_string(f.dir.path().join("mode.txt")).unwrap();
        assert_eq!(content.trim(), "Native");
        assert!(f.controller.is_persisted_match());
    }

    #[tokio::test]
    async fn test_legacy_value_is_restored_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mode.txt"), "ControllerPassthrough").unwrap();
        let f = fixture_in(dir, Mode::Native, test_config(), |b| b);
        let changes = record_changes(&f.controller);

        assert!(f.controller.initialize_from_persistence().await);

        assert_eq!(f.controller.current_mode(), Mode::HardwarePassthrough);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![(Mode::Native, Mode::HardwarePassthrough)]
        );
        let content = fs::read_to_string(f.dir.path().join("mode.txt")).unwrap();
        assert_eq!(content.trim(), "HardwarePassthrough");
    }

    #[tokio::test]
    async fn test_initialization_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mode.txt"), "ConvertedOutput").unwrap();
        let f = fixture_in(dir, Mode::Native, test_config(), |b| b);

        assert!(f.controller.initialize_from_persistence().await);
        f.controller.switch(Mode::Native).await;
        f.controller.initialize_from_persistence().await;

        assert_eq!(f.controller.current_mode(), Mode::Native);
        assert_eq!(
            f.registry.apply_calls(),
            vec![Mode::ConvertedOutput, Mode::Native]
        );
    }

    #[tokio::test]
    async fn test_failed_restore_keeps_default_mode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mode.txt"), "HardwarePassthrough").unwrap();
        let f = fixture_in(dir, Mode::Native, test_config(), |b| b);
        f.registry.fail_mode(Mode::HardwarePassthrough);

        assert!(!f.controller.initialize_from_persistence().await);

        assert_eq!(f.controller.current_mode(), Mode::Native);
        let content = fs::read_to_string(f.dir.path().join("mode.txt")).unwrap();
        assert_eq!(content.trim(), "HardwarePassthrough");
        assert!(!f.controller.is_persisted_match());
    }

    #[tokio::test]
    async fn test_unrecognized_value_is_replaced_with_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mode.txt"), "Turbo").unwrap();
        let f = fixture_in(dir, Mode::Native, test_config(), |b| b);

        assert!(f.controller.initialize_from_persistence().await);

        let content = fs::read_to_string(f.dir.path().join("mode.txt")).unwrap();
        assert_eq!(content.trim(), "Native");
        assert!(f.controller.is_persisted_match());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            health_interval_ms: 0,
            ..test_config()
        };
        let result = ModeController::open(dir.path(), config, Arc::new(FakeRegistry::default()));
        assert!(matches!(
            result,
            Err(ControllerError::Config(ConfigError::Invalid {
                field: "health_interval_ms",
                ..
            }))
        ));
    }

    #[test]
    fn test_state_file_outside_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            state_file: "../escape.txt".into(),
            ..test_config()
        };
        let result = ModeController::open(dir.path(), config, Arc::new(FakeRegistry::default()));
        assert!(matches!(result, Err(ControllerError::Store(_))));
    }
}

// =============================================================================
// Diagnostics queries
// =============================================================================

mod queries {
    use super::*;

    #[tokio::test]
    async fn test_summary_reflects_history() {
        let f = fixture();
        f.controller.switch(Mode::ConvertedOutput).await;
        f.registry.fail_mode(Mode::HardwarePassthrough);
        f.controller.switch(Mode::HardwarePassthrough).await;

        let summary = f.controller.diagnostics_summary();
        assert_eq!(summary.current_mode, Mode::ConvertedOutput);
        assert_eq!(summary.persisted_mode, Some(Mode::ConvertedOutput));
        assert!(summary.is_persisted_match);
        assert_eq!(summary.history_len, 2);
        assert_eq!(summary.recent_failures, 1);
        assert!(!summary.last_transition.unwrap().success);
        assert!(!summary.disposed);

        let json = serde_json::to_value(f.controller.diagnostics_summary()).unwrap();
        assert_eq!(json["current_mode"], "ConvertedOutput");
    }

    #[tokio::test]
    async fn test_suppression_comes_from_provider() {
        let observations = SharedObservations::new();
        observations.set_suppression(true);
        let provider = observations.clone();
        let f = fixture_with(test_config(), move |b| b.provider(Arc::new(provider)));

        assert_eq!(f.controller.suppression_active(), Some(true));
        assert!(f.controller.validate_system_state().is_valid);

        f.controller.switch(Mode::HardwarePassthrough).await;
        let audit = f.controller.validate_system_state();
        assert!(audit.is_valid);
        assert_eq!(audit.warnings().count(), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_provider_suppression() {
        let observations = SharedObservations::new();
        observations.set_suppression(true);
        let provider = observations.clone();
        let f = fixture_with(test_config(), move |b| b.provider(Arc::new(provider)));

        f.controller.switch(Mode::HardwarePassthrough).await;
        let report = f.controller.diagnostics().run_health_check();

        assert!(report.is_healthy);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.starts_with("advisory:") && issue.contains("suppression")));

        observations.set_suppression(false);
        assert!(f.controller.diagnostics().run_health_check().issues.is_empty());
    }

    #[tokio::test]
    async fn test_mode_changed_timestamp_uses_clock() {
        let start = chrono::DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let f = fixture_with(test_config(), {
            let clock = Arc::clone(&clock);
            move |b| b.clock(clock)
        });
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        f.controller
            .subscribe_mode_changed(move |event| sink.lock().unwrap().push(event.timestamp_ms))
            .unwrap();

        f.controller.switch(Mode::ConvertedOutput).await;
        clock.advance(chrono::Duration::seconds(5));
        f.controller.switch(Mode::Native).await;

        assert_eq!(
            *stamps.lock().unwrap(),
            vec![1_700_000_000_000, 1_700_000_005_000]
        );
    }

    #[tokio::test]
    async fn test_state_value_exposes_committed_mode() {
        let f = fixture();
        f.controller.switch(Mode::ConvertedOutput).await;

        assert_eq!(
            f.controller.state_value(state_keys::CURRENT_MODE),
            Some(serde_json::json!("ConvertedOutput"))
        );
        assert!(f.controller.last_outcome().unwrap().success);
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_publishes_reports() {
        let config = ControllerConfig {
            health_interval_ms: 1_000,
            ..test_config()
        };
        let f = fixture_with(config, |b| b);
        let reports = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&reports);
        f.controller
            .subscribe_health(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        f.controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(reports.load(Ordering::SeqCst), 3);
        assert!(f.controller.latest_health().unwrap().is_healthy);
        f.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_mirrors_registry_changes() {
        let f = fixture();
        f.controller.start().unwrap();

        f.registry.set_applied(Mode::HardwarePassthrough);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            f.controller.state_value(state_keys::REGISTRY_MODE),
            Some(serde_json::json!("HardwarePassthrough"))
        );
        f.controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_fails_fast_afterwards() {
        let f = fixture();
        f.controller.start().unwrap();

        f.controller.shutdown().await;
        f.controller.shutdown().await;

        assert!(f.controller.is_disposed());
        let outcome = f
            .controller
            .switch_with(Mode::ConvertedOutput, SwitchOptions::default())
            .await;
        assert_eq!(outcome.failure, Some(TransitionFailure::Disposed));
        assert!(!f.controller.switch(Mode::ConvertedOutput).await);
        assert!(matches!(
            f.controller.subscribe_mode_changed(|_| {}),
            Err(ControllerError::Disposed)
        ));
        assert!(matches!(f.controller.start(), Err(ControllerError::Disposed)));
        assert!(f.registry.apply_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_transition_aborts_it() {
        let f = fixture();
        f.registry.set_apply_delay(Duration::from_secs(2));
        let changes = record_changes(&f.controller);

        let switching = {
            let controller = Arc::clone(&f.controller);
            tokio::spawn(async move {
                controller
                    .switch_with(Mode::HardwarePassthrough, SwitchOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.controller.is_transition_in_progress());

        f.controller.shutdown().await;
        let outcome = switching.await.unwrap();

        assert_eq!(outcome.failure, Some(TransitionFailure::Disposed));
        assert_eq!(f.controller.current_mode(), Mode::Native);
        assert!(changes.lock().unwrap().is_empty());
    }
}
