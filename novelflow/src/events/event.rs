//! Typed events emitted by pipelines and batches.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{BatchStatus, StageFailure, StageKind, TaskStatus};

/// Something observable happened during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A batch was accepted and its tasks created.
    BatchSubmitted {
        /// Batch id.
        batch_id: Uuid,
        /// Batch name.
        name: String,
        /// Number of tasks.
        total: usize,
    },
    /// A batch reached a final status.
    BatchFinished {
        /// Batch id.
        batch_id: Uuid,
        /// Final status.
        status: BatchStatus,
        /// Succeeded tasks.
        completed: usize,
        /// Failed tasks.
        failed: usize,
        /// Cancelled tasks.
        cancelled: usize,
    },
    /// Batch cancellation was requested.
    BatchCancelled {
        /// Batch id.
        batch_id: Uuid,
        /// Reason given.
        reason: String,
    },
    /// A pipeline started working on a task.
    TaskStarted {
        /// Owning batch.
        batch_id: Uuid,
        /// Task id.
        task_id: Uuid,
    },
    /// A stage attempt began.
    StageStarted {
        /// Task id.
        task_id: Uuid,
        /// Stage.
        stage: StageKind,
        /// 1-based attempt.
        attempt: u32,
    },
    /// A stage produced its artifact.
    StageCompleted {
        /// Task id.
        task_id: Uuid,
        /// Stage.
        stage: StageKind,
        /// Attempts used.
        attempts: u32,
    },
    /// A stage failed and the task will not continue.
    StageFailed {
        /// Task id.
        task_id: Uuid,
        /// The failure.
        failure: StageFailure,
    },
    /// One chapter unit succeeded.
    ChapterCompleted {
        /// Task id.
        task_id: Uuid,
        /// Chapter index.
        index: usize,
        /// Chapter length in characters.
        length: usize,
    },
    /// One chapter unit failed; the fan-out continues.
    ChapterFailed {
        /// Task id.
        task_id: Uuid,
        /// The failure.
        failure: StageFailure,
    },
    /// Task progress moved forward.
    Progress {
        /// Task id.
        task_id: Uuid,
        /// Percentage in `[0, 100]`.
        progress: f64,
        /// Step description.
        step: String,
    },
    /// A task reached a terminal status.
    TaskFinished {
        /// Owning batch.
        batch_id: Uuid,
        /// Task id.
        task_id: Uuid,
        /// Terminal status.
        status: TaskStatus,
    },
}

impl GenerationEvent {
    /// Dotted event type, e.g. `stage.failed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BatchSubmitted { .. } => "batch.submitted",
            Self::BatchFinished { .. } => "batch.finished",
            Self::BatchCancelled { .. } => "batch.cancelled",
            Self::TaskStarted { .. } => "task.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::ChapterCompleted { .. } => "chapter.completed",
            Self::ChapterFailed { .. } => "chapter.failed",
            Self::Progress { .. } => "task.progress",
            Self::TaskFinished { .. } => "task.finished",
        }
    }
}
