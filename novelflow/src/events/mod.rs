//! Event sink system for observability.
//!
//! Pipelines and orchestrators emit typed [`GenerationEvent`]s into an
//! injected [`EventSink`]. Emission from hot paths uses `try_emit`, which
//! never blocks.

mod channel;
mod event;
mod sink;

pub use channel::{ChannelEventSink, ChannelMetrics};
pub use event::GenerationEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
