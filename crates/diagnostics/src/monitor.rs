//! Periodic health check task.

use crate::recorder::DiagnosticsRecorder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default interval between health checks.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest interval the monitor accepts; shorter requests are raised to it.
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(1);

/// Runs [`DiagnosticsRecorder::run_health_check`] on a tokio task.
///
/// Each `start` creates a fresh cancellation token, so `stop` followed by
/// `start` works. The task never touches the transition guard.
pub struct HealthMonitor {
    running: Arc<AtomicBool>,
    cancel_token: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel_token: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        }
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the check loop on the current runtime. No-op if already running.
    pub fn start(&self, recorder: Arc<DiagnosticsRecorder>, interval: Duration) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!("HealthMonitor already running");
            return;
        }

        let interval = if interval < MIN_HEALTH_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                "Health interval too short, using the minimum"
            );
            MIN_HEALTH_INTERVAL
        } else {
            interval
        };

        let token = CancellationToken::new();
        let child = token.child_token();
        *self.cancel_token.lock().expect("monitor mutex poisoned") = token;

        let handle = tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "HealthMonitor started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // check runs one interval after start.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        recorder.run_health_check();
                    }
                }
            }

            tracing::info!("HealthMonitor stopped");
        });

        *self.handle.lock().expect("monitor mutex poisoned") = Some(handle);
    }

    /// Signal the loop to stop. Does not wait for the task.
    pub fn stop(&self) {
        self.cancel_token
            .lock()
            .expect("monitor mutex poisoned")
            .cancel();
        self.running.store(false, Ordering::Release);
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().expect("monitor mutex poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "HealthMonitor task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_runs_every_interval() {
        let recorder = Arc::new(DiagnosticsRecorder::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);
        recorder.subscribe_health(move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        let monitor = HealthMonitor::new();
        monitor.start(Arc::clone(&recorder), Duration::from_secs(5));
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        monitor.shutdown().await;
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let recorder = Arc::new(DiagnosticsRecorder::default());
        let monitor = HealthMonitor::new();

        monitor.start(Arc::clone(&recorder), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(recorder.latest_health().is_some());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_restarts_after_stop() {
        let recorder = Arc::new(DiagnosticsRecorder::default());
        let monitor = HealthMonitor::new();

        monitor.start(Arc::clone(&recorder), Duration::from_secs(1));
        monitor.shutdown().await;
        monitor.start(Arc::clone(&recorder), Duration::from_secs(1));
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(recorder.latest_health().is_some());
        monitor.shutdown().await;
    }
}
