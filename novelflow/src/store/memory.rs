//! In-memory task store.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{ProgressUpdate, TaskStore};
use crate::core::{BatchJob, BatchSnapshot, BatchStatus, PipelineStage, PipelineTask};
use crate::errors::StoreError;

/// Keeps tasks and batches in memory.
///
/// Lock order is always batch mutex first, then the task entry.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<Uuid, PipelineTask>,
    batches: DashMap<Uuid, Arc<Mutex<BatchJob>>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn batch(&self, batch_id: Uuid) -> Result<Arc<Mutex<BatchJob>>, StoreError> {
        self.batches
            .get(&batch_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::BatchNotFound(batch_id))
    }

    fn batch_of(&self, task_id: Uuid) -> Result<Arc<Mutex<BatchJob>>, StoreError> {
        let batch_id = self
            .tasks
            .get(&task_id)
            .map(|t| t.batch_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        self.batch(batch_id)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_batch(&self, batch: BatchJob) -> Result<(), StoreError> {
        debug!(batch_id = %batch.id(), total = batch.counts().total, "Creating batch");
        self.batches.insert(batch.id(), Arc::new(Mutex::new(batch)));
        Ok(())
    }

    async fn create_task(&self, task: PipelineTask) -> Result<(), StoreError> {
        if !self.batches.contains_key(&task.batch_id) {
            return Err(StoreError::BatchNotFound(task.batch_id));
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    async fn mark_running(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let batch = self.batch_of(task_id)?;
        let mut job = batch.lock();
        let mut task = self.tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        if !task.transition(PipelineStage::Settings) {
            return Ok(false);
        }
        job.observe_running(task_id);
        job.observe_progress(task_id, task.progress);
        Ok(true)
    }

    async fn update_progress(&self, task_id: Uuid, update: ProgressUpdate) -> Result<(), StoreError> {
        let batch = self.batch_of(task_id)?;
        let mut job = batch.lock();
        let mut task = self.tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        if task.is_terminal() || update.stage.is_terminal() {
            return Ok(());
        }
        task.transition(update.stage);
        if update.stage == task.stage {
            task.advance_progress(update.progress);
            task.current_step = update.step;
        }
        job.observe_progress(task_id, task.progress);
        Ok(())
    }

    async fn record_result(&self, task: PipelineTask) -> Result<bool, StoreError> {
        if !task.is_terminal() {
            return Ok(false);
        }
        let batch = self.batch(task.batch_id)?;
        let mut job = batch.lock();
        {
            let mut stored = self.tasks.get_mut(&task.id).ok_or(StoreError::TaskNotFound(task.id))?;
            if stored.is_terminal() {
                debug!(task_id = %task.id, "Ignoring result for terminal task");
                return Ok(false);
            }
            *stored = task.clone();
        }
        Ok(job.observe_terminal(task.summary()))
    }

    async fn set_batch_status(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        reason: Option<String>,
    ) -> Result<bool, StoreError> {
        let batch = self.batch(batch_id)?;
        let mut job = batch.lock();
        Ok(match status {
            BatchStatus::Running => job.start(),
            BatchStatus::Cancelled => job.cancel(reason.unwrap_or_else(|| "Cancelled".to_string())),
            BatchStatus::Pending | BatchStatus::Completed | BatchStatus::Failed => false,
        })
    }

    async fn cancel_pending(&self, batch_id: Uuid, reason: &str) -> Result<Vec<Uuid>, StoreError> {
        let batch = self.batch(batch_id)?;
        let mut job = batch.lock();
        job.cancel(reason);

        let mut cancelled = Vec::new();
        for task_id in job.task_ids().to_vec() {
            let Some(mut task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            if task.stage == PipelineStage::Pending && task.cancel(reason) {
                let summary = task.summary();
                drop(task);
                job.observe_terminal(summary);
                cancelled.push(task_id);
            }
        }
        Ok(cancelled)
    }

    async fn cancel_pending_task(&self, task_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let batch = self.batch_of(task_id)?;
        let mut job = batch.lock();
        let mut task = self.tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        if task.stage != PipelineStage::Pending || !task.cancel(reason) {
            return Ok(false);
        }
        let summary = task.summary();
        drop(task);
        job.observe_terminal(summary);
        Ok(true)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<PipelineTask, StoreError> {
        self.tasks
            .get(&task_id)
            .map(|t| t.clone())
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn list_tasks(&self, batch_id: Uuid) -> Result<Vec<PipelineTask>, StoreError> {
        let ids = self.batch(batch_id)?.lock().task_ids().to_vec();
        Ok(ids
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<BatchSnapshot, StoreError> {
        Ok(self.batch(batch_id)?.lock().snapshot())
    }

    async fn list_batches(&self) -> Result<Vec<BatchSnapshot>, StoreError> {
        let batches: Vec<Arc<Mutex<BatchJob>>> = self.batches.iter().map(|e| Arc::clone(e.value())).collect();
        let mut snapshots: Vec<BatchSnapshot> = batches.iter().map(|b| b.lock().snapshot()).collect();
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }
}
