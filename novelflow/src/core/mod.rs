//! Core domain model types for novelflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage, task and batch status enums
//! - Typed stage artifacts and generation parameters
//! - Stage results, pipeline tasks and the batch aggregate

mod artifact;
mod batch;
mod params;
mod result;
mod status;
mod task;

pub use artifact::{
    AssembledArtifact, ChapterArtifact, ChapterSpec, CharacterProfile, OutlineArtifact, ParsedArtifact,
    SettingsArtifact,
};
pub use batch::{BatchCounts, BatchJob, BatchSnapshot};
pub use params::GenerationParams;
pub use result::{FailureKind, RawModelResponse, StageFailure, StageResult};
pub use status::{BatchStatus, PipelineStage, StageKind, TaskStatus};
pub use task::{PipelineTask, StageOutcome, StageRecord, TaskArtifacts, TaskSummary};
