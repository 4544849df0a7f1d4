//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

use super::GenerationEvent;

/// Receives generation events.
///
/// Sinks are injected into pipelines and orchestrators; there is no global
/// sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, waiting for capacity if the sink is bounded.
    async fn emit(&self, event: GenerationEvent);

    /// Emits an event without blocking.
    ///
    /// Must never panic; a sink that cannot accept the event drops it.
    fn try_emit(&self, event: GenerationEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: GenerationEvent) {}

    fn try_emit(&self, _event: GenerationEvent) {}
}

/// Logs events through `tracing`; failure events always log at warn.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &GenerationEvent) {
        let event_type = event.event_type();
        match event {
            GenerationEvent::StageFailed { failure, .. } | GenerationEvent::ChapterFailed { failure, .. } => {
                warn!(event_type, kind = %failure.kind, reason = %failure.reason, "Event: {}", event_type);
            }
            _ if self.level == Level::DEBUG => {
                debug!(event_type, event_data = ?event, "Event: {}", event_type);
            }
            _ => info!(event_type, event_data = ?event, "Event: {}", event_type),
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: GenerationEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: GenerationEvent) {
        self.log_event(&event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<GenerationEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose dotted type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<GenerationEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: GenerationEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: GenerationEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn started(task_id: Uuid) -> GenerationEvent {
        GenerationEvent::TaskStarted {
            batch_id: Uuid::nil(),
            task_id,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(started(Uuid::nil())).await;
        let sink = LoggingEventSink::debug();
        sink.emit(started(Uuid::nil())).await;
        sink.try_emit(started(Uuid::nil()));
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(started(Uuid::nil())).await;
        sink.try_emit(GenerationEvent::ChapterCompleted {
            task_id: Uuid::nil(),
            index: 1,
            length: 10,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_of_type("task.").len(), 1);
        assert_eq!(sink.events_of_type("chapter.").len(), 1);
    }
}
