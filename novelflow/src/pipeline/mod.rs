//! Pipeline execution.
//!
//! This module provides:
//! - [`GenerationPipeline`]: the Settings, Outline, Chapters, Assembly state machine
//! - [`ChapterFanOut`]: bounded, failure-tolerant chapter generation
//! - Retry policy for the early stages
//! - Best-effort progress reporting

mod fanout;
mod generation;
mod progress;
mod retry;

pub use fanout::{ChapterFanOut, FanOutReport};
pub use generation::GenerationPipeline;
pub use progress::ProgressReporter;
pub use retry::{should_retry, with_retry_if, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision};
