//! Bounded channel-backed event sink.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

use super::{EventSink, GenerationEvent};

/// Counters for a bounded sink.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelMetrics {
    /// Number of events accepted.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drop rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let emitted = self.emitted();
        let dropped = self.dropped();
        let total = emitted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }
}

/// Forwards events into a bounded `mpsc` queue.
///
/// `try_emit` never waits: when the queue is full the event is dropped and
/// counted. The receiving half is returned from [`ChannelEventSink::new`].
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<GenerationEvent>,
    metrics: ChannelMetrics,
}

impl ChannelEventSink {
    /// Creates a sink with the given capacity and its receiver.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<GenerationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                metrics: ChannelMetrics::default(),
            },
            rx,
        )
    }

    /// Returns the counters.
    #[must_use]
    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: GenerationEvent) {
        if self.tx.send(event).await.is_ok() {
            self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn try_emit(&self, event: GenerationEvent) {
        let event_type = event.event_type();
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let dropped_total = self.metrics.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event_type = %event_type,
                    dropped_total,
                    "Event dropped due to backpressure"
                );
            }
        }
    }
}
