//! Event bus abstraction for UI-facing event emission.
//!
//! The tray, overlay and settings surfaces consume JSON payloads by topic.
//! The bus keeps the orchestration core free of any UI toolkit so it can run
//! headless and be tested without one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Trait for emitting events to UI subscribers.
pub trait EventBus: Send + Sync {
    /// Emit an event with a JSON payload.
    ///
    /// # Arguments
    /// * `topic` - Event name/topic (e.g., "mode:changed")
    /// * `payload` - JSON payload to emit
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// Serialize `event` and emit it on `topic`.
///
/// Serialization failures are logged and the event is dropped.
pub fn emit_event<T: Serialize>(bus: &dyn EventBus, topic: &str, event: &T) {
    match serde_json::to_value(event) {
        Ok(payload) => bus.emit(topic, payload),
        Err(e) => tracing::warn!(topic, error = %e, "Failed to serialize event payload"),
    }
}

/// A captured `(topic, payload)` pair.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Bus that records every emission, for tests and diagnostics dumps.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<EmittedEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    /// Events captured for a specific topic, oldest first.
    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Payloads on `topic` decoded back into their typed form.
    ///
    /// Payloads that do not decode as `T` are skipped.
    pub fn decoded<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.events_for(topic)
            .into_iter()
            .filter_map(|e| serde_json::from_value(e.payload).ok())
            .collect()
    }

    /// Distinct topics in first-emitted order.
    pub fn topics(&self) -> Vec<String> {
        let events = self.events.lock().expect("event bus mutex poisoned");
        let mut topics: Vec<String> = Vec::new();
        for event in events.iter() {
            if !topics.contains(&event.topic) {
                topics.push(event.topic.clone());
            }
        }
        topics
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .push(EmittedEvent {
                topic: topic.to_string(),
                payload,
            });
    }
}
