//! # Novelflow
//!
//! Resilient structured generation for long-form story drafts.
//!
//! Novelflow turns one set of story parameters into a finished manuscript by
//! running a fixed chain of model-backed stages, and runs many such chains at
//! once as a batch:
//!
//! - **Structured response parsing**: recovers JSON from fenced, chatty or
//!   truncated model output through ordered repair passes
//! - **Typed stages**: settings, outline and chapters are validated into typed
//!   artifacts right after parsing, then assembled without another call
//! - **Chapter fan-out**: chapters are generated concurrently on a bounded pool
//!   and individual failures become gaps, not task failures
//! - **Batch orchestration**: N variants run in the background with aggregated
//!   progress and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use novelflow::prelude::*;
//! use serde_json::json;
//!
//! let config = GeneratorConfig::from_env()?;
//! let completion = Arc::new(OpenAiCompatibleClient::new(&config.provider)?);
//! let orchestrator = BatchOrchestrator::in_memory(completion, config)?;
//!
//! let request = BatchRequest::new("harbor town")
//!     .with_base(json!({"genre": "romance", "chapterCount": 8}).as_object().cloned().unwrap_or_default())
//!     .with_copies(3);
//! let snapshot = orchestrator.run(request).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod cancellation;
pub mod completion;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod parsing;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;
pub mod workers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::batch::{BatchOrchestrator, BatchRequest};
    pub use crate::cancellation::CancellationToken;
    #[cfg(feature = "http")]
    pub use crate::completion::OpenAiCompatibleClient;
    pub use crate::completion::{CompletionFn, CompletionRequest};
    pub use crate::config::GeneratorConfig;
    pub use crate::core::{
        AssembledArtifact, BatchSnapshot, BatchStatus, GenerationParams, PipelineStage, PipelineTask, StageKind,
        TaskStatus,
    };
    pub use crate::errors::{CallError, ConfigError, NovelflowError, ParseError, StoreError, ValidationError};
    pub use crate::events::{EventSink, GenerationEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::parsing::StructuredResponseParser;
    pub use crate::pipeline::GenerationPipeline;
    pub use crate::store::{InMemoryTaskStore, TaskStore};
}
