//! Mode handler registry.
//!
//! The orchestrator only asks a registry to apply a mode and reads back
//! which mode is applied. What a mode does to input lives in the handlers.

use crate::error::HandlerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use switchyard_mode::Mode;
use tokio::sync::watch;

/// Activates the side effects of the requested mode.
#[async_trait]
pub trait ModeHandlerRegistry: Send + Sync {
    /// Called before `apply`; a failure aborts the transition untouched.
    async fn prepare(&self, _from: Mode, _to: Mode) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Make `mode` the applied mode.
    async fn apply(&self, mode: Mode) -> Result<(), HandlerError>;

    /// The mode the handlers currently have applied.
    fn current_applied_mode(&self) -> Mode;

    /// Stream of applied-mode changes, if the registry publishes one.
    fn mode_changes(&self) -> Option<watch::Receiver<Mode>> {
        None
    }
}

pub type ModeHandlerRegistryRef = Arc<dyn ModeHandlerRegistry>;

/// Side effects of a single mode.
#[async_trait]
pub trait ModeHandler: Send + Sync {
    async fn activate(&self) -> Result<(), HandlerError>;

    async fn deactivate(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub type ModeHandlerRef = Arc<dyn ModeHandler>;

/// Registry built from one handler per mode.
///
/// Applying a mode deactivates the handler of the applied mode and then
/// activates the target's. The applied mode only changes when activation
/// succeeds, and every change is published on a watch channel.
pub struct HandlerSet {
    handlers: RwLock<HashMap<Mode, ModeHandlerRef>>,
    applied: watch::Sender<Mode>,
}

impl HandlerSet {
    /// `initial` is reported as applied until the first successful `apply`.
    pub fn new(initial: Mode) -> Self {
        let (applied, _) = watch::channel(initial);
        Self {
            handlers: RwLock::new(HashMap::new()),
            applied,
        }
    }

    /// Register (or replace) the handler for `mode`.
    pub fn register(&self, mode: Mode, handler: ModeHandlerRef) {
        let replaced = self
            .handlers
            .write()
            .expect("handler map lock poisoned")
            .insert(mode, handler)
            .is_some();
        tracing::debug!(mode = %mode, replaced, "Registered mode handler");
    }

    pub fn is_registered(&self, mode: Mode) -> bool {
        self.handlers
            .read()
            .expect("handler map lock poisoned")
            .contains_key(&mode)
    }

    fn handler(&self, mode: Mode) -> Option<ModeHandlerRef> {
        self.handlers
            .read()
            .expect("handler map lock poisoned")
            .get(&mode)
            .cloned()
    }
}

#[async_trait]
impl ModeHandlerRegistry for HandlerSet {
    async fn prepare(&self, _from: Mode, to: Mode) -> Result<(), HandlerError> {
        if self.is_registered(to) {
            Ok(())
        } else {
            Err(HandlerError::NotRegistered(to))
        }
    }

    async fn apply(&self, mode: Mode) -> Result<(), HandlerError> {
        let target = self.handler(mode).ok_or(HandlerError::NotRegistered(mode))?;

        let current = self.current_applied_mode();
        if let Some(previous) = self.handler(current) {
            previous.deactivate().await?;
        }
        target.activate().await?;

        self.applied.send_replace(mode);
        tracing::debug!(from = %current, to = %mode, "Mode handlers applied");
        Ok(())
    }

    fn current_applied_mode(&self) -> Mode {
        *self.applied.borrow()
    }

    fn mode_changes(&self) -> Option<watch::Receiver<Mode>> {
        Some(self.applied.subscribe())
    }
}
