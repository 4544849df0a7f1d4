//! Batch submission and orchestration.
//!
//! A batch expands one base parameter map into N variants and runs one
//! [`GenerationPipeline`](crate::pipeline::GenerationPipeline) per variant in
//! the background. Callers poll snapshots or wait for the final one.

mod orchestrator;
mod request;

#[cfg(test)]
mod integration_tests;

pub use orchestrator::BatchOrchestrator;
pub use request::BatchRequest;
