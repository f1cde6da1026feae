//! Single-slot mutual exclusion for transitions.

use crate::error::AcquireError;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

/// Allows at most one transition in flight.
///
/// Waiters queue fairly. After [`close`](Self::close) every acquire fails
/// immediately, including those already waiting.
#[derive(Debug)]
pub struct ConcurrencyGuard {
    slot: Semaphore,
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self {
            slot: Semaphore::new(1),
        }
    }
}

/// Proof that the holder owns the transition slot. Dropping it releases
/// the slot.
#[derive(Debug)]
pub struct TransitionPermit<'a> {
    _permit: SemaphorePermit<'a>,
    acquired_at: Instant,
}

impl TransitionPermit<'_> {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for TransitionPermit<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Transition slot released"
        );
    }
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the slot; `None` on timeout or after close.
    pub async fn acquire(&self, timeout: Duration) -> Option<TransitionPermit<'_>> {
        self.acquire_detailed(timeout).await.ok()
    }

    pub async fn acquire_detailed(
        &self,
        timeout: Duration,
    ) -> Result<TransitionPermit<'_>, AcquireError> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.slot.acquire()).await {
            Ok(Ok(permit)) => Ok(Self::wrap(permit)),
            Ok(Err(_)) => Err(AcquireError::Closed),
            Err(_) => Err(AcquireError::TimedOut {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Take the slot only if it is free right now.
    pub fn try_acquire(&self) -> Result<TransitionPermit<'_>, AcquireError> {
        match self.slot.try_acquire() {
            Ok(permit) => Ok(Self::wrap(permit)),
            Err(TryAcquireError::Closed) => Err(AcquireError::Closed),
            Err(TryAcquireError::NoPermits) => Err(AcquireError::TimedOut { waited_ms: 0 }),
        }
    }

    pub fn is_held(&self) -> bool {
        !self.slot.is_closed() && self.slot.available_permits() == 0
    }

    /// Fail every current and future acquire. Idempotent.
    pub fn close(&self) {
        self.slot.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    fn wrap(permit: SemaphorePermit<'_>) -> TransitionPermit<'_> {
        TransitionPermit {
            _permit: permit,
            acquired_at: Instant::now(),
        }
    }
}
