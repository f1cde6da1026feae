//! Transition execution for switchyard.
//!
//! - [`ConcurrencyGuard`]: at most one transition in flight, bounded wait
//! - [`TransitionOrchestrator`]: validate → prepare → execute → validate →
//!   finalize, with rollback when execute ran but the transition did not commit
//! - [`ModeHandlerRegistry`]: the seam to whatever applies a mode's side effects
//!
//! # Example
//!
//! ```ignore
//! let permit = guard.acquire(Duration::from_secs(10)).await?;
//! let outcome = orchestrator
//!     .execute_transition(&permit, TransitionRequest::new(from, to).with_caller("tray"))
//!     .await;
//! ```

mod error;
mod guard;
mod orchestrator;
mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{AcquireError, HandlerError};
pub use guard::{ConcurrencyGuard, TransitionPermit};
pub use orchestrator::{OrchestratorConfig, TransitionOrchestrator, TransitionRequest};
pub use registry::{
    HandlerSet, ModeHandler, ModeHandlerRef, ModeHandlerRegistry, ModeHandlerRegistryRef,
};
