//! Generic key/value store for cross-component facts.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Well-known keys published by the orchestration core.
pub mod state_keys {
    /// Last committed mode.
    pub const CURRENT_MODE: &str = "current_mode";
    /// Mode most recently reported by the handler registry's change stream.
    pub const REGISTRY_MODE: &str = "registry_mode";
    pub const SUPPRESSION_ENABLED: &str = "suppression_enabled";
    pub const DRIVER_CONNECTED: &str = "driver_connected";
    pub const DEVICE_CONNECTED: &str = "device_connected";
    pub const PASSTHROUGH_RUNNING: &str = "passthrough_running";
    pub const LAST_TRANSITION_AT: &str = "last_transition_at";
    /// Phase that ran last, with its result.
    pub const LAST_PHASE: &str = "last_phase";
}

/// Thread-safe JSON value store. Locks are held only for the map access.
#[derive(Debug, Default)]
pub struct StateStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`; unserializable values are logged and dropped.
    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.values
                    .write()
                    .expect("state store lock poisoned")
                    .insert(key.to_string(), value);
            }
            Err(e) => tracing::warn!(key, error = %e, "Failed to serialize state value"),
        }
    }

    /// Decode the value under `key`, or `None` if absent or of another type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_raw(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(key, error = %e, "State value has unexpected type");
                None
            }
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .read()
            .expect("state store lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.values
            .write()
            .expect("state store lock poisoned")
            .remove(key)
            .is_some()
    }

    /// Copy of every entry.
    pub fn entries(&self) -> HashMap<String, serde_json::Value> {
        self.values
            .read()
            .expect("state store lock poisoned")
            .clone()
    }
}
