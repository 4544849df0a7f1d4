//! The per-variant unit of work tracked through the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    AssembledArtifact, ChapterArtifact, GenerationParams, OutlineArtifact, PipelineStage, SettingsArtifact,
    StageFailure, StageKind, TaskStatus,
};
use crate::utils::{generate_id, now_utc, Timestamp};

/// How a stage execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Artifact produced.
    Succeeded,
    /// Stage failed with this reason.
    Failed {
        /// Failure reason.
        reason: String,
    },
    /// Stage was cancelled.
    Cancelled,
}

/// History entry for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage executed.
    pub stage: StageKind,
    /// Number of attempts made (fan-out counts dispatched units).
    pub attempts: u32,
    /// When the stage began.
    pub started_at: Timestamp,
    /// When the stage ended.
    pub ended_at: Timestamp,
    /// How it ended.
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Artifacts accumulated by one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifacts {
    /// Settings, once generated.
    pub settings: Option<SettingsArtifact>,
    /// Outline, once generated.
    pub outline: Option<OutlineArtifact>,
    /// Generated chapters in outline order.
    #[serde(default)]
    pub chapters: Vec<ChapterArtifact>,
    /// Chapter units that failed.
    #[serde(default)]
    pub chapter_failures: Vec<StageFailure>,
    /// Final manuscript.
    pub assembled: Option<AssembledArtifact>,
}

/// Compact per-task result kept on the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub task_id: Uuid,
    /// Task name.
    pub name: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Manuscript title on success.
    pub title: Option<String>,
    /// Number of chapters assembled.
    pub chapter_count: usize,
    /// Total manuscript length.
    pub total_length: usize,
    /// Failure reason, when not successful.
    pub error: Option<String>,
}

/// One variant's generation run.
///
/// Status only moves forward: `Pending -> Running -> {Succeeded, Failed,
/// Cancelled}` or directly `Pending -> Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    /// Task id.
    pub id: Uuid,
    /// Owning batch.
    pub batch_id: Uuid,
    /// Display name.
    pub name: String,
    /// Position of the variant in the batch request.
    pub variant_index: usize,
    /// Merged variant parameters.
    pub params: GenerationParams,
    /// Current state-machine position.
    pub stage: PipelineStage,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Progress percentage in `[0, 100]`.
    pub progress: f64,
    /// Description of the current step.
    pub current_step: String,
    /// Per-stage history.
    #[serde(default)]
    pub history: Vec<StageRecord>,
    /// Accumulated artifacts.
    #[serde(default)]
    pub artifacts: TaskArtifacts,
    /// Failure that ended the task.
    pub failure: Option<StageFailure>,
    /// Creation time.
    pub created_at: Timestamp,
    /// When the pipeline started.
    pub started_at: Option<Timestamp>,
    /// When the task became terminal.
    pub completed_at: Option<Timestamp>,
}

impl PipelineTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(batch_id: Uuid, name: impl Into<String>, variant_index: usize, params: GenerationParams) -> Self {
        Self {
            id: generate_id(),
            batch_id,
            name: name.into(),
            variant_index,
            params,
            stage: PipelineStage::Pending,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_step: PipelineStage::Pending.step_label().to_string(),
            history: Vec::new(),
            artifacts: TaskArtifacts::default(),
            failure: None,
            created_at: now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns true once the task can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next` if that is forward progress.
    ///
    /// Returns false (and changes nothing) for backward moves and for any move
    /// out of a terminal stage.
    pub fn transition(&mut self, next: PipelineStage) -> bool {
        if self.stage.is_terminal() || next <= self.stage {
            return false;
        }

        let status = match next {
            PipelineStage::Pending => TaskStatus::Pending,
            PipelineStage::Settings | PipelineStage::Outline | PipelineStage::Chapters | PipelineStage::Assembly => {
                TaskStatus::Running
            }
            PipelineStage::Succeeded => TaskStatus::Succeeded,
            PipelineStage::Failed => TaskStatus::Failed,
            PipelineStage::Cancelled => TaskStatus::Cancelled,
        };
        if status != self.status && !self.status.can_transition_to(status) {
            return false;
        }

        if self.started_at.is_none() && status == TaskStatus::Running {
            self.started_at = Some(now_utc());
        }
        if next.is_terminal() {
            self.completed_at = Some(now_utc());
        }

        self.stage = next;
        self.status = status;
        self.current_step = next.step_label().to_string();
        if next == PipelineStage::Succeeded || (!next.is_terminal() && next.progress_milestone() > self.progress) {
            self.progress = next.progress_milestone();
        }
        true
    }

    /// Raises progress; lower values are ignored.
    pub fn advance_progress(&mut self, progress: f64) {
        if !self.is_terminal() && progress > self.progress {
            self.progress = progress.min(100.0);
        }
    }

    /// Appends a stage history entry.
    pub fn record_stage(&mut self, stage: StageKind, attempts: u32, started_at: Timestamp, outcome: StageOutcome) {
        self.history.push(StageRecord {
            stage,
            attempts,
            started_at,
            ended_at: now_utc(),
            outcome,
        });
    }

    /// Terminates the task as failed.
    pub fn fail(&mut self, failure: StageFailure) -> bool {
        if self.transition(PipelineStage::Failed) {
            self.current_step = format!("Failed at {} stage", failure.stage);
            self.failure = Some(failure);
            return true;
        }
        false
    }

    /// Terminates the task as cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        let stage = self.stage.stage_kind().unwrap_or(StageKind::Settings);
        if self.transition(PipelineStage::Cancelled) {
            self.failure = Some(StageFailure::cancelled(stage, reason));
            return true;
        }
        false
    }

    /// Builds the compact summary kept on the batch.
    #[must_use]
    pub fn summary(&self) -> TaskSummary {
        let assembled = self.artifacts.assembled.as_ref();
        TaskSummary {
            task_id: self.id,
            name: self.name.clone(),
            status: self.status,
            title: assembled.map(|a| a.title.clone()),
            chapter_count: assembled.map_or(0, |a| a.chapters.len()),
            total_length: assembled.map_or(0, |a| a.total_length),
            error: self.failure.as_ref().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;

    fn task() -> PipelineTask {
        PipelineTask::new(Uuid::nil(), "variant-0", 0, GenerationParams::default())
    }

    #[test]
    fn test_forward_transitions() {
        let mut t = task();
        assert!(t.transition(PipelineStage::Settings));
        assert_eq!(t.status, TaskStatus::Running);
        assert!((t.progress - 10.0).abs() < f64::EPSILON);
        assert!(t.started_at.is_some());

        assert!(t.transition(PipelineStage::Outline));
        assert!(t.transition(PipelineStage::Chapters));
        assert!(t.transition(PipelineStage::Assembly));
        assert!(t.transition(PipelineStage::Succeeded));
        assert_eq!(t.status, TaskStatus::Succeeded);
        assert!((t.progress - 100.0).abs() < f64::EPSILON);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut t = task();
        t.transition(PipelineStage::Outline);
        assert!(!t.transition(PipelineStage::Settings));
        assert_eq!(t.stage, PipelineStage::Outline);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut t = task();
        t.transition(PipelineStage::Settings);
        assert!(t.fail(StageFailure::new(StageKind::Settings, FailureKind::Parse, "bad")));
        assert!(!t.cancel("late"));
        assert!(!t.transition(PipelineStage::Succeeded));
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.failure.as_ref().map(|f| f.kind), Some(FailureKind::Parse));
    }

    #[test]
    fn test_pending_can_be_cancelled() {
        let mut t = task();
        assert!(t.cancel("batch cancelled"));
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.started_at.is_none());
    }

    #[test]
    fn test_failed_progress_is_not_raised() {
        let mut t = task();
        t.transition(PipelineStage::Settings);
        t.transition(PipelineStage::Outline);
        t.fail(StageFailure::new(StageKind::Outline, FailureKind::Validation, "no chapters"));
        assert!((t.progress - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_monotonic() {
        let mut t = task();
        t.transition(PipelineStage::Chapters);
        t.advance_progress(65.0);
        t.advance_progress(55.0);
        assert!((t.progress - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_on_failure() {
        let mut t = task();
        t.transition(PipelineStage::Settings);
        t.fail(StageFailure::new(StageKind::Settings, FailureKind::Parse, "no json"));
        let summary = t.summary();
        assert_eq!(summary.status, TaskStatus::Failed);
        assert!(summary.error.unwrap_or_default().contains("no json"));
        assert_eq!(summary.title, None);
    }
}
