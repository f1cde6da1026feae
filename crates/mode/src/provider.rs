//! Provider traits for cross-component observations.
//!
//! These replace process-wide flags: whoever owns a fact (suppression hook,
//! driver client, device watcher) exposes it through a provider that is
//! injected into validation, so tests control every value deterministically.

use crate::snapshot::{ModeObservation, SystemSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Source of optional system observations.
///
/// Every method defaults to "not observed".
pub trait SystemStateProvider: Send + Sync {
    /// Whether raw input is currently suppressed.
    fn suppression_enabled(&self) -> Option<bool> {
        None
    }

    /// Whether the virtual-controller driver is connected.
    fn driver_connected(&self) -> Option<bool> {
        None
    }

    /// Whether a physical input device is connected.
    fn device_connected(&self) -> Option<bool> {
        None
    }

    /// Whether the passthrough loop is running.
    fn passthrough_running(&self) -> Option<bool> {
        None
    }

    /// Modes reported by components other than the handler registry.
    fn observed_modes(&self) -> Vec<ModeObservation> {
        Vec::new()
    }

    /// Overlay every available observation onto `snapshot`.
    fn fill_snapshot(&self, snapshot: &mut SystemSnapshot) {
        if let Some(value) = self.suppression_enabled() {
            snapshot.suppression_enabled = Some(value);
        }
        if let Some(value) = self.driver_connected() {
            snapshot.driver_connected = Some(value);
        }
        if let Some(value) = self.device_connected() {
            snapshot.device_connected = Some(value);
        }
        if let Some(value) = self.passthrough_running() {
            snapshot.passthrough_running = Some(value);
        }
        snapshot.observed_modes.extend(self.observed_modes());
    }
}

/// Shared provider reference.
pub type SystemStateProviderRef = Arc<dyn SystemStateProvider>;

/// Null implementation for testing or minimal deployments.
pub struct NullProvider;

impl SystemStateProvider for NullProvider {}

/// Plain set of observations, settable at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observations {
    pub suppression_enabled: Option<bool>,
    pub driver_connected: Option<bool>,
    pub device_connected: Option<bool>,
    pub passthrough_running: Option<bool>,
}

/// Thread-safe, cloneable observation cell.
///
/// Components that own a fact write it here; validation reads it back.
#[derive(Debug, Clone, Default)]
pub struct SharedObservations {
    inner: Arc<RwLock<Observations>>,
}

impl SharedObservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Observations {
        self.inner
            .read()
            .expect("observations lock poisoned")
            .clone()
    }

    /// Apply `f` to the observations under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut Observations)) {
        let mut guard = self.inner.write().expect("observations lock poisoned");
        f(&mut guard);
    }

    pub fn set_suppression(&self, enabled: bool) {
        self.update(|o| o.suppression_enabled = Some(enabled));
    }

    pub fn set_driver_connected(&self, connected: bool) {
        self.update(|o| o.driver_connected = Some(connected));
    }

    pub fn set_device_connected(&self, connected: bool) {
        self.update(|o| o.device_connected = Some(connected));
    }

    pub fn set_passthrough_running(&self, running: bool) {
        self.update(|o| o.passthrough_running = Some(running));
    }
}

impl SystemStateProvider for SharedObservations {
    fn suppression_enabled(&self) -> Option<bool> {
        self.get().suppression_enabled
    }

    fn driver_connected(&self) -> Option<bool> {
        self.get().driver_connected
    }

    fn device_connected(&self) -> Option<bool> {
        self.get().device_connected
    }

    fn passthrough_running(&self) -> Option<bool> {
        self.get().passthrough_running
    }
}
