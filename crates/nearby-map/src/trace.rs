//! Lifecycle trace
//!
//! Ordered, bounded record of what a widget did. Developer-facing only:
//! nothing reads it for correctness. Every entry is also emitted as a
//! `tracing` event.

use crate::error::ErrorKind;
use crate::types::{Coordinate, SessionId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Gate switched on
    ActivationRequested,
    /// Activation refused before any load
    ConfigurationRejected { message: String },
    /// Script available
    ScriptReady,
    /// Script failed or timed out
    ScriptFailed { message: String },
    /// Async result arrived after the gate moved on
    StaleResultDiscarded { stage: String },
    /// Map created
    SessionCreated { session: SessionId },
    /// Map and markers released
    SessionDestroyed { session: SessionId, markers: usize },
    /// Marker diff applied
    MarkersSynced {
        added: usize,
        removed: usize,
        updated: usize,
    },
    /// Map centre moved
    Recentered { center: Coordinate },
    /// Click on the self marker
    SelfClickIgnored,
    /// Click on another user's marker
    UserSelected { user: UserId },
    /// Gate switched off
    Deactivated,
    /// Widget entered the error phase
    Errored { kind: ErrorKind, message: String },
    /// Widget removed from the host
    Unmounted,
}

/// One trace entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    /// Wall-clock time
    pub at: DateTime<Utc>,
    /// Activation generation the event belongs to
    pub generation: u64,
    /// Event payload
    #[serde(flatten)]
    pub kind: LifecycleEventKind,
}

#[derive(Debug)]
struct TraceInner {
    events: VecDeque<LifecycleEvent>,
    capacity: usize,
    generation: u64,
}

/// Shared, bounded lifecycle trace
#[derive(Debug, Clone)]
pub struct LifecycleTrace {
    inner: Arc<Mutex<TraceInner>>,
}

impl LifecycleTrace {
    /// Create new trace keeping at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceInner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                generation: 0,
            })),
        }
    }

    /// Stamp subsequent events with `generation`
    pub fn set_generation(&self, generation: u64) {
        self.inner.lock().generation = generation;
    }

    /// Append an event, evicting the oldest when full
    pub fn record(&self, kind: LifecycleEventKind) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;
        tracing::trace!(generation, "lifecycle: {:?}", kind);
        if inner.events.len() == inner.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(LifecycleEvent {
            at: Utc::now(),
            generation,
            kind,
        });
    }

    /// Copy of the retained events, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// Retained event kinds, oldest first
    #[must_use]
    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.inner
            .lock()
            .events
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }

    /// Export the retained events as JSON
    ///
    /// # Errors
    /// Returns the serializer error, which only happens for non-finite coordinates.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.events())
    }
}

impl Default for LifecycleTrace {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_ordered() {
        let trace = LifecycleTrace::new(2);
        trace.record(LifecycleEventKind::ActivationRequested);
        trace.set_generation(3);
        trace.record(LifecycleEventKind::ScriptReady);
        trace.record(LifecycleEventKind::Deactivated);

        let events = trace.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, LifecycleEventKind::ScriptReady);
        assert_eq!(events[1].kind, LifecycleEventKind::Deactivated);
        assert_eq!(events[1].generation, 3);
    }

    #[test]
    fn json_export_is_tagged() {
        let trace = LifecycleTrace::default();
        trace.record(LifecycleEventKind::MarkersSynced {
            added: 2,
            removed: 0,
            updated: 1,
        });

        let json = trace.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["event"], "markers_synced");
        assert_eq!(value[0]["added"], 2);
        assert_eq!(value[0]["generation"], 0);
    }
}
