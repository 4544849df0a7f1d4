//! Stage, task and batch status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of model-backed (or merge) step a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Story settings: title, summary, characters.
    Settings,
    /// Chapter outline derived from the settings.
    Outline,
    /// One chapter body, generated from an outline entry.
    Chapter,
    /// Pure merge of all upstream artifacts.
    Assembly,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings => write!(f, "settings"),
            Self::Outline => write!(f, "outline"),
            Self::Chapter => write!(f, "chapter"),
            Self::Assembly => write!(f, "assembly"),
        }
    }
}

/// Position of a pipeline in its state machine.
///
/// Ordering follows the declaration order, so a pipeline may only move to a
/// stage that compares greater than its current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Created, not started.
    #[default]
    Pending,
    /// Generating settings.
    Settings,
    /// Generating the outline.
    Outline,
    /// Fanning out chapter generation.
    Chapters,
    /// Merging artifacts.
    Assembly,
    /// Finished with an assembled artifact.
    Succeeded,
    /// A stage failed.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
}

impl PipelineStage {
    /// Returns true for the three terminal stages.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Progress percentage reported when this stage is entered.
    #[must_use]
    pub fn progress_milestone(&self) -> f64 {
        match self {
            Self::Pending => 0.0,
            Self::Settings => 10.0,
            Self::Outline => 30.0,
            Self::Chapters => 50.0,
            Self::Assembly => 80.0,
            Self::Succeeded => 100.0,
            Self::Failed | Self::Cancelled => 100.0,
        }
    }

    /// Human-readable step description stored alongside progress.
    #[must_use]
    pub fn step_label(&self) -> &'static str {
        match self {
            Self::Pending => "Waiting",
            Self::Settings => "Generating settings",
            Self::Outline => "Generating outline",
            Self::Chapters => "Generating chapters",
            Self::Assembly => "Assembling manuscript",
            Self::Succeeded => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Returns the stage kind driven by this pipeline stage, if any.
    #[must_use]
    pub fn stage_kind(&self) -> Option<StageKind> {
        match self {
            Self::Settings => Some(StageKind::Settings),
            Self::Outline => Some(StageKind::Outline),
            Self::Chapters => Some(StageKind::Chapter),
            Self::Assembly => Some(StageKind::Assembly),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Settings => "settings",
            Self::Outline => "outline",
            Self::Chapters => "chapters",
            Self::Assembly => "assembly",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a pipeline worker.
    #[default]
    Pending,
    /// A pipeline is executing the task.
    Running,
    /// The task produced an assembled artifact.
    Succeeded,
    /// A stage failed.
    Failed,
    /// The task was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if no further transitions may occur.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle status of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, no task dispatched yet.
    #[default]
    Pending,
    /// At least one task is in flight or queued.
    Running,
    /// Every task is terminal and at least one succeeded.
    Completed,
    /// Every task is terminal and none succeeded.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl BatchStatus {
    /// Returns true for final batch states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
