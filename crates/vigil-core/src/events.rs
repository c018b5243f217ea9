//! Typed engine events and their fan-out to observers.

use crate::types::Rect;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A known identity was logged.
    Recognized,
    /// A new training photo was saved for a known identity.
    Captured,
    /// A face the model could not resolve.
    Unknown,
    /// An unknown face has been stable long enough to enroll.
    EnrollReady,
    /// The enrollable face left the view.
    EnrollCleared,
    /// A new identity was enrolled.
    Enrolled,
    /// A body without a recognized face matched a height profile.
    HeightMatch,
    RetrainStarted,
    RetrainFinished,
    ClipSaved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognized => "recognized",
            Self::Captured => "captured",
            Self::Unknown => "unknown",
            Self::EnrollReady => "enroll_ready",
            Self::EnrollCleared => "enroll_cleared",
            Self::Enrolled => "enrolled",
            Self::HeightMatch => "height_match",
            Self::RetrainStarted => "retrain_started",
            Self::RetrainFinished => "retrain_finished",
            Self::ClipSaved => "clip_saved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub label: Option<i64>,
    pub name: Option<String>,
    pub confidence: Option<f64>,
    pub region: Option<Rect>,
    /// Free-form detail, e.g. a clip path or retrain summary.
    pub detail: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            label: None,
            name: None,
            confidence: None,
            region: None,
            detail: None,
        }
    }

    pub fn identity(mut self, label: i64, name: impl Into<String>) -> Self {
        self.label = Some(label);
        self.name = Some(name.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Best-effort, fire-and-forget event consumer. Must not block and must
/// swallow its own failures.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Fans events out to any number of async subscribers. Slow subscribers
/// lag and lose old events instead of blocking the publisher.
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &Event) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event.clone());
    }
}

/// Writes every event to the tracing log.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &Event) {
        tracing::debug!(
            kind = ?event.kind,
            label = ?event.label,
            name = ?event.name,
            confidence = ?event.confidence,
            "event"
        );
    }
}

/// Forwards to several sinks in order.
#[derive(Default, Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOut {
    fn publish(&self, event: &Event) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every published event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().unwrap().iter().map(|e| e.kind).collect()
        }

        pub fn count(&self, kind: EventKind) -> usize {
            self.kinds().into_iter().filter(|k| *k == kind).count()
        }
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
