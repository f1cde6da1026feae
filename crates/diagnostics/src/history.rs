//! Bounded FIFO history of transition attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use switchyard_mode::Mode;

/// Default number of retained transition events.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Lightweight record of one transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub timestamp: DateTime<Utc>,
    pub from: Mode,
    pub to: Mode,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub caller_id: String,
}

/// Ring of the most recent events; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct TransitionHistory {
    capacity: usize,
    events: VecDeque<TransitionEvent>,
}

impl Default for TransitionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl TransitionHistory {
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `event`, returning the evicted event if the ring was full.
    pub fn push(&mut self, event: TransitionEvent) -> Option<TransitionEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<TransitionEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TransitionEvent> {
        self.events.iter()
    }

    /// Failed attempts at or after `since`.
    pub fn failures_since(&self, since: DateTime<Utc>) -> usize {
        self.events
            .iter()
            .filter(|e| !e.success && e.timestamp >= since)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64, success: bool) -> TransitionEvent {
        TransitionEvent {
            timestamp: DateTime::from_timestamp(n, 0).unwrap(),
            from: Mode::Native,
            to: Mode::ConvertedOutput,
            success,
            error: None,
            caller_id: format!("caller-{n}"),
        }
    }

    #[test]
    fn test_history_keeps_most_recent_hundred() {
        let mut history = TransitionHistory::default();
        for n in 0..150 {
            history.push(event(n, true));
        }

        assert_eq!(history.len(), 100);
        let oldest = history.iter().next().unwrap();
        assert_eq!(oldest.caller_id, "caller-50");
        let newest = &history.recent(1)[0];
        assert_eq!(newest.caller_id, "caller-149");
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut history = TransitionHistory::with_capacity(2);
        assert!(history.push(event(0, true)).is_none());
        assert!(history.push(event(1, true)).is_none());
        let evicted = history.push(event(2, true)).unwrap();
        assert_eq!(evicted.caller_id, "caller-0");
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut history = TransitionHistory::default();
        for n in 0..5 {
            history.push(event(n, true));
        }
        let callers: Vec<_> = history.recent(3).into_iter().map(|e| e.caller_id).collect();
        assert_eq!(callers, vec!["caller-4", "caller-3", "caller-2"]);
    }

    #[test]
    fn test_failures_since_respects_window() {
        let mut history = TransitionHistory::default();
        history.push(event(0, false));
        history.push(event(10, false));
        history.push(event(20, true));
        history.push(event(30, false));

        let since = DateTime::from_timestamp(10, 0).unwrap();
        assert_eq!(history.failures_since(since), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = TransitionHistory::with_capacity(0);
        history.push(event(0, true));
        history.push(event(1, true));
        assert_eq!(history.len(), 1);
    }
}
