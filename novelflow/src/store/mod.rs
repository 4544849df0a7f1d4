//! Persistence of tasks and batch aggregates.
//!
//! The store is the single owner of each batch's aggregate. Every child
//! update that touches a batch runs under that batch's lock, so counts and
//! progress never lose an increment.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{BatchJob, BatchSnapshot, BatchStatus, PipelineStage, PipelineTask};
use crate::errors::StoreError;

/// A progress report for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Stage the pipeline is in.
    pub stage: PipelineStage,
    /// Percentage in `[0, 100)`.
    pub progress: f64,
    /// Description of the current step.
    pub step: String,
}

impl ProgressUpdate {
    /// Update for entering `stage`, at its milestone.
    #[must_use]
    pub fn entering(stage: PipelineStage) -> Self {
        Self {
            stage,
            progress: stage.progress_milestone(),
            step: stage.step_label().to_string(),
        }
    }

    /// Update within `stage` with a custom step text.
    #[must_use]
    pub fn within(stage: PipelineStage, progress: f64, step: impl Into<String>) -> Self {
        Self {
            stage,
            progress,
            step: step.into(),
        }
    }
}

/// Storage for tasks and batches.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new batch aggregate.
    async fn create_batch(&self, batch: BatchJob) -> Result<(), StoreError>;

    /// Stores a new pending task.
    async fn create_task(&self, task: PipelineTask) -> Result<(), StoreError>;

    /// Moves a pending task to running.
    ///
    /// Returns `false` when the task is no longer pending (e.g. it was
    /// cancelled before a worker picked it up).
    async fn mark_running(&self, task_id: Uuid) -> Result<bool, StoreError>;

    /// Records forward progress. Backward moves and updates to terminal tasks
    /// are ignored.
    async fn update_progress(&self, task_id: Uuid, update: ProgressUpdate) -> Result<(), StoreError>;

    /// Records a terminal task and folds it into its batch.
    ///
    /// Returns `false` without changing anything when the stored task is
    /// already terminal or `task` is not.
    async fn record_result(&self, task: PipelineTask) -> Result<bool, StoreError>;

    /// Sets a batch status. Only `Running` and `Cancelled` can be set;
    /// `Completed` and `Failed` are derived from the children.
    async fn set_batch_status(&self, batch_id: Uuid, status: BatchStatus, reason: Option<String>)
        -> Result<bool, StoreError>;

    /// Cancels every pending child of a batch and marks the batch cancelled.
    ///
    /// Returns the ids of the children that were cancelled.
    async fn cancel_pending(&self, batch_id: Uuid, reason: &str) -> Result<Vec<Uuid>, StoreError>;

    /// Cancels one task if it is still pending.
    async fn cancel_pending_task(&self, task_id: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// Returns a copy of a task.
    async fn get_task(&self, task_id: Uuid) -> Result<PipelineTask, StoreError>;

    /// Returns every task of a batch in variant order.
    async fn list_tasks(&self, batch_id: Uuid) -> Result<Vec<PipelineTask>, StoreError>;

    /// Returns a batch snapshot.
    async fn get_batch(&self, batch_id: Uuid) -> Result<BatchSnapshot, StoreError>;

    /// Returns snapshots of every batch, oldest first.
    async fn list_batches(&self) -> Result<Vec<BatchSnapshot>, StoreError>;
}
