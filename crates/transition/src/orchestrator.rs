//! The transition protocol.
//!
//! ```text
//! pre-validate ─► prepare ─► execute ─► settle + post-validate ─► finalize
//!                               │                │
//!                               └──► rollback ◄──┘   (execute ran, no commit)
//! ```
//!
//! Every phase shares one deadline and is raced against the caller's token
//! and the orchestrator's shutdown token. Nothing is persisted before
//! finalize, and once finalize starts the transition always commits.

use crate::error::HandlerError;
use crate::guard::TransitionPermit;
use crate::registry::ModeHandlerRegistryRef;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use switchyard_diagnostics::{state_keys, DiagnosticsRef};
use switchyard_mode::{
    Mode, PhaseResult, SystemSnapshot, SystemStateProviderRef, TransitionFailure,
    TransitionOutcome, TransitionPhase, ValidationOutcome, Validator,
};
use switchyard_storage::ModeRepositoryRef;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Timing knobs for the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Overall deadline when the request carries none.
    pub default_timeout: Duration,
    /// Pause between execute and post-validation so observers can catch up.
    pub settle_delay: Duration,
    /// Bound on re-applying the previous mode.
    pub rollback_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(100),
            rollback_timeout: Duration::from_secs(5),
        }
    }
}

/// One requested transition.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub from: Mode,
    pub to: Mode,
    pub caller_id: String,
    /// Overrides [`OrchestratorConfig::default_timeout`].
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl TransitionRequest {
    pub fn new(from: Mode, to: Mode) -> Self {
        Self {
            from,
            to,
            caller_id: "unknown".to_string(),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What cut a phase short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Disposed,
    TimedOut,
}

impl Interrupt {
    fn into_failure(self, phase: TransitionPhase) -> TransitionFailure {
        match self {
            Interrupt::Cancelled => TransitionFailure::Cancelled { phase },
            Interrupt::Disposed => TransitionFailure::Disposed,
            Interrupt::TimedOut => TransitionFailure::TimedOut { phase },
        }
    }
}

/// Per-attempt bookkeeping.
struct Attempt {
    request: TransitionRequest,
    deadline: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
    phases: Vec<PhaseResult>,
    pre_validation: ValidationOutcome,
    post_validation: Option<ValidationOutcome>,
    rolled_back: bool,
}

impl Attempt {
    fn phase(&mut self, phase: TransitionPhase, started: Instant, message: Option<String>) {
        self.phases.push(PhaseResult {
            phase,
            success: message.is_none(),
            duration_ms: started.elapsed().as_millis() as u64,
            message,
        });
    }
}

/// Runs transitions through the validate, prepare, execute, validate and
/// finalize phases.
pub struct TransitionOrchestrator {
    registry: ModeHandlerRegistryRef,
    store: ModeRepositoryRef,
    diagnostics: DiagnosticsRef,
    validator: Arc<dyn Validator>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl TransitionOrchestrator {
    pub fn new(
        registry: ModeHandlerRegistryRef,
        store: ModeRepositoryRef,
        diagnostics: DiagnosticsRef,
    ) -> Self {
        Self {
            registry,
            store,
            validator: diagnostics.validator(),
            diagnostics,
            config: OrchestratorConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Validator for both transitions and the recorder's health audits.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.diagnostics.set_validator(Arc::clone(&validator));
        self.validator = validator;
        self
    }

    /// Register `provider` with the recorder, so transitions and health
    /// checks see the same observations.
    pub fn with_provider(self, provider: SystemStateProviderRef) -> Self {
        self.diagnostics.add_provider(provider);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancelling `token` aborts every in-flight transition as disposed.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModeHandlerRegistryRef {
        &self.registry
    }

    pub fn diagnostics(&self) -> &DiagnosticsRef {
        &self.diagnostics
    }

    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }

    /// Observations from diagnostics and providers, with `expected` as the
    /// current mode and the registry as an observer.
    pub fn snapshot(&self, expected: Mode) -> SystemSnapshot {
        let mut snapshot = self.diagnostics.system_snapshot();
        snapshot.current_mode = Some(expected);
        snapshot.observe("registry", self.registry.current_applied_mode());
        snapshot
    }

    /// Run one transition. The permit proves the caller holds the guard.
    ///
    /// Never returns an error: every failure is described by the outcome,
    /// which is also recorded in diagnostics.
    pub async fn execute_transition(
        &self,
        _permit: &TransitionPermit<'_>,
        request: TransitionRequest,
    ) -> TransitionOutcome {
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        tracing::info!(
            from = %request.from,
            to = %request.to,
            caller = %request.caller_id,
            timeout_ms = timeout.as_millis() as u64,
            "Transition requested"
        );

        let mut attempt = Attempt {
            deadline: Instant::now() + timeout,
            started_at: self.diagnostics.now(),
            phases: Vec::new(),
            pre_validation: ValidationOutcome::default(),
            post_validation: None,
            rolled_back: false,
            request,
        };

        let result = self.run(&mut attempt).await;
        self.finish(attempt, result)
    }

    async fn run(&self, attempt: &mut Attempt) -> Result<(), TransitionFailure> {
        let (from, to) = (attempt.request.from, attempt.request.to);

        // Pre-validate
        let started = Instant::now();
        if let Some(interrupt) = self.interrupted(attempt) {
            attempt.phase(TransitionPhase::PreValidate, started, Some(interrupt_message(interrupt)));
            return Err(interrupt.into_failure(TransitionPhase::PreValidate));
        }
        let pre = self
            .validator
            .validate_transition(from, to, &self.snapshot(from));
        pre.log(TransitionPhase::PreValidate.as_str());
        attempt.pre_validation = pre.clone();
        if !pre.is_valid {
            let summary = pre.error_summary();
            attempt.phase(TransitionPhase::PreValidate, started, Some(summary.clone()));
            return Err(TransitionFailure::Validation { summary });
        }
        attempt.phase(TransitionPhase::PreValidate, started, None);

        // Prepare: nothing has been touched yet, so failures need no rollback.
        let started = Instant::now();
        match self
            .guarded(attempt, call_handler(self.registry.prepare(from, to)))
            .await
        {
            Ok(Ok(())) => attempt.phase(TransitionPhase::Prepare, started, None),
            Ok(Err(e)) => {
                attempt.phase(TransitionPhase::Prepare, started, Some(e.to_string()));
                return Err(TransitionFailure::Prepare {
                    message: e.to_string(),
                });
            }
            Err(interrupt) => {
                attempt.phase(TransitionPhase::Prepare, started, Some(interrupt_message(interrupt)));
                return Err(interrupt.into_failure(TransitionPhase::Prepare));
            }
        }

        // Execute
        let started = Instant::now();
        match self
            .guarded(attempt, call_handler(self.registry.apply(to)))
            .await
        {
            Ok(Ok(())) => attempt.phase(TransitionPhase::Execute, started, None),
            Ok(Err(e)) => {
                attempt.phase(TransitionPhase::Execute, started, Some(e.to_string()));
                self.rollback(attempt).await;
                return Err(TransitionFailure::Execute {
                    message: e.to_string(),
                });
            }
            Err(interrupt) => {
                attempt.phase(TransitionPhase::Execute, started, Some(interrupt_message(interrupt)));
                self.rollback(attempt).await;
                return Err(interrupt.into_failure(TransitionPhase::Execute));
            }
        }

        // Settle, then post-validate against the target.
        let started = Instant::now();
        if let Err(interrupt) = self
            .guarded(attempt, tokio::time::sleep(self.config.settle_delay))
            .await
        {
            attempt.phase(TransitionPhase::PostValidate, started, Some(interrupt_message(interrupt)));
            self.rollback(attempt).await;
            return Err(interrupt.into_failure(TransitionPhase::PostValidate));
        }
        let post = self.validator.validate_system_state(&self.snapshot(to));
        post.log(TransitionPhase::PostValidate.as_str());
        attempt.post_validation = Some(post.clone());
        if !post.is_valid {
            let summary = post.error_summary();
            attempt.phase(TransitionPhase::PostValidate, started, Some(summary.clone()));
            self.rollback(attempt).await;
            return Err(TransitionFailure::PostValidation { summary });
        }
        attempt.phase(TransitionPhase::PostValidate, started, None);

        // Last chance to abort; past this point the transition commits.
        let started = Instant::now();
        if let Some(interrupt) = self.interrupted(attempt) {
            attempt.phase(TransitionPhase::Finalize, started, Some(interrupt_message(interrupt)));
            self.rollback(attempt).await;
            return Err(interrupt.into_failure(TransitionPhase::Finalize));
        }

        // Finalize
        if !self.store.persist(to) {
            tracing::warn!(mode = %to, "Mode not persisted; in-memory mode stays authoritative");
        }
        self.diagnostics.set_state(state_keys::CURRENT_MODE, to);
        self.diagnostics
            .set_state(state_keys::LAST_TRANSITION_AT, self.diagnostics.now());
        attempt.phase(TransitionPhase::Finalize, started, None);
        Ok(())
    }

    /// Race `fut` against cancellation, shutdown and the deadline.
    async fn guarded<F: Future>(&self, attempt: &Attempt, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = attempt.request.cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = self.shutdown.cancelled() => Err(Interrupt::Disposed),
            _ = tokio::time::sleep_until(attempt.deadline) => Err(Interrupt::TimedOut),
            value = fut => Ok(value),
        }
    }

    fn interrupted(&self, attempt: &Attempt) -> Option<Interrupt> {
        if attempt.request.cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if self.shutdown.is_cancelled() {
            Some(Interrupt::Disposed)
        } else if Instant::now() >= attempt.deadline {
            Some(Interrupt::TimedOut)
        } else {
            None
        }
    }

    /// Re-apply the source mode. Bounded by its own timeout, not by the
    /// (possibly already fired) tokens; failures are only logged.
    async fn rollback(&self, attempt: &mut Attempt) {
        let from = attempt.request.from;
        let started = Instant::now();
        tracing::warn!(mode = %from, "Rolling back to previous mode");

        let result = tokio::time::timeout(
            self.config.rollback_timeout,
            call_handler(self.registry.apply(from)),
        )
        .await;

        let message = match result {
            Ok(Ok(())) => {
                attempt.rolled_back = true;
                None
            }
            Ok(Err(e)) => {
                tracing::error!(mode = %from, error = %e, "Rollback failed");
                Some(e.to_string())
            }
            Err(_) => {
                tracing::error!(
                    mode = %from,
                    timeout_ms = self.config.rollback_timeout.as_millis() as u64,
                    "Rollback timed out"
                );
                Some("rollback timed out".to_string())
            }
        };
        attempt.phase(TransitionPhase::Rollback, started, message);
    }

    fn finish(&self, attempt: Attempt, result: Result<(), TransitionFailure>) -> TransitionOutcome {
        let (success, error_message, failure) = match result {
            Ok(()) => (true, None, None),
            Err(failure) => (false, Some(failure.to_string()), Some(failure)),
        };

        let outcome = TransitionOutcome {
            from: attempt.request.from,
            to: attempt.request.to,
            started_at: attempt.started_at,
            completed_at: self.diagnostics.now(),
            success,
            error_message,
            failure,
            pre_validation: attempt.pre_validation,
            post_validation: attempt.post_validation,
            phase_results: attempt.phases,
            rolled_back: attempt.rolled_back,
        };
        self.diagnostics
            .record_outcome(&outcome, &attempt.request.caller_id);
        outcome
    }
}

/// Run a handler future, turning a panic into a [`HandlerError`].
async fn call_handler<F>(fut: F) -> Result<(), HandlerError>
where
    F: Future<Output = Result<(), HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn interrupt_message(interrupt: Interrupt) -> String {
    match interrupt {
        Interrupt::Cancelled => "cancelled".to_string(),
        Interrupt::Disposed => "shut down".to_string(),
        Interrupt::TimedOut => "deadline exceeded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_maps_to_distinct_failures() {
        assert_eq!(
            Interrupt::Cancelled.into_failure(TransitionPhase::Execute),
            TransitionFailure::Cancelled {
                phase: TransitionPhase::Execute
            }
        );
        assert_eq!(
            Interrupt::TimedOut.into_failure(TransitionPhase::Prepare),
            TransitionFailure::TimedOut {
                phase: TransitionPhase::Prepare
            }
        );
        assert_eq!(
            Interrupt::Disposed.into_failure(TransitionPhase::Execute),
            TransitionFailure::Disposed
        );
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_error() {
        let result = call_handler(async {
            if true {
                panic!("driver exploded");
            }
            Ok::<(), HandlerError>(())
        })
        .await;
        assert_eq!(result, Err(HandlerError::Panicked("driver exploded".into())));
    }

    #[test]
    fn test_request_builder() {
        let request = TransitionRequest::new(Mode::Native, Mode::ConvertedOutput)
            .with_caller("tray")
            .with_timeout(Duration::from_secs(2));
        assert_eq!(request.caller_id, "tray");
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert!(!request.cancel.is_cancelled());
    }
}
