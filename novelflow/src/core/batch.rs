//! Batch aggregate: counts, weighted progress and final status.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{BatchStatus, TaskStatus, TaskSummary};
use crate::utils::{generate_id, now_utc, Timestamp};

/// Non-terminal children never report more than this.
const RUNNING_PROGRESS_CAP: f64 = 99.0;

#[derive(Debug, Clone, Copy)]
struct ChildState {
    status: TaskStatus,
    progress: f64,
}

/// Aggregate counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Number of child tasks.
    pub total: usize,
    /// Succeeded children.
    pub completed: usize,
    /// Failed children.
    pub failed: usize,
    /// Cancelled children.
    pub cancelled: usize,
    /// Children currently running.
    pub running: usize,
}

impl BatchCounts {
    /// Number of terminal children.
    #[must_use]
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Mutable batch aggregate, owned by the task store under a per-batch lock.
#[derive(Debug, Clone)]
pub struct BatchJob {
    id: Uuid,
    name: String,
    task_ids: Vec<Uuid>,
    children: HashMap<Uuid, ChildState>,
    status: BatchStatus,
    counts: BatchCounts,
    results: Vec<TaskSummary>,
    error_message: Option<String>,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    estimated_completion: Option<Timestamp>,
    per_task_estimate: Duration,
}

impl BatchJob {
    /// Creates a pending batch over the given child ids.
    #[must_use]
    pub fn new(name: impl Into<String>, task_ids: Vec<Uuid>, per_task_estimate: Duration) -> Self {
        Self::with_id(generate_id(), name, task_ids, per_task_estimate)
    }

    /// Creates a pending batch with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: Uuid, name: impl Into<String>, task_ids: Vec<Uuid>, per_task_estimate: Duration) -> Self {
        let children = task_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    ChildState {
                        status: TaskStatus::Pending,
                        progress: 0.0,
                    },
                )
            })
            .collect();
        Self {
            id,
            name: name.into(),
            counts: BatchCounts {
                total: task_ids.len(),
                ..BatchCounts::default()
            },
            task_ids,
            children,
            status: BatchStatus::Pending,
            results: Vec::new(),
            error_message: None,
            created_at: now_utc(),
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            per_task_estimate,
        }
    }

    /// Batch id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Current counts.
    #[must_use]
    pub fn counts(&self) -> BatchCounts {
        self.counts
    }

    /// Child task ids in variant order.
    #[must_use]
    pub fn task_ids(&self) -> &[Uuid] {
        &self.task_ids
    }

    /// Returns true once every child is terminal.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.counts.terminal() == self.counts.total
    }

    /// Moves the batch to `Running` and stamps the estimate.
    ///
    /// Returns false if the batch is not pending.
    pub fn start(&mut self) -> bool {
        if self.status != BatchStatus::Pending {
            return false;
        }
        let now = now_utc();
        self.status = BatchStatus::Running;
        self.started_at = Some(now);
        let estimate = self.per_task_estimate.saturating_mul(u32::try_from(self.counts.total).unwrap_or(u32::MAX));
        self.estimated_completion = chrono::Duration::from_std(estimate).ok().map(|d| now + d);
        true
    }

    /// Marks the batch cancelled; terminal batches are left alone.
    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Cancelled;
        self.error_message = Some(reason.into());
        self.finish_if_done();
        true
    }

    /// Records that a child started running.
    pub fn observe_running(&mut self, task_id: Uuid) -> bool {
        match self.children.get_mut(&task_id) {
            Some(child) if child.status == TaskStatus::Pending => {
                child.status = TaskStatus::Running;
                self.counts.running += 1;
                true
            }
            _ => false,
        }
    }

    /// Records a child progress update.
    pub fn observe_progress(&mut self, task_id: Uuid, progress: f64) -> bool {
        match self.children.get_mut(&task_id) {
            Some(child) if !child.status.is_terminal() && progress > child.progress => {
                child.progress = progress.min(RUNNING_PROGRESS_CAP);
                true
            }
            _ => false,
        }
    }

    /// Records a child reaching a terminal status.
    ///
    /// Returns false if the child is unknown, already terminal, or `status`
    /// is not terminal. The final batch status is computed once the last child
    /// lands.
    pub fn observe_terminal(&mut self, summary: TaskSummary) -> bool {
        if !summary.status.is_terminal() {
            return false;
        }
        let Some(child) = self.children.get_mut(&summary.task_id) else {
            return false;
        };
        if child.status.is_terminal() {
            return false;
        }
        if child.status == TaskStatus::Running {
            self.counts.running = self.counts.running.saturating_sub(1);
        }
        child.status = summary.status;
        child.progress = 100.0;

        match summary.status {
            TaskStatus::Succeeded => self.counts.completed += 1,
            TaskStatus::Failed => self.counts.failed += 1,
            _ => self.counts.cancelled += 1,
        }
        self.results.push(summary);
        self.finish_if_done();
        true
    }

    fn finish_if_done(&mut self) {
        if !self.all_terminal() || self.completed_at.is_some() {
            return;
        }
        self.completed_at = Some(now_utc());
        if self.status == BatchStatus::Cancelled {
            return;
        }
        if self.counts.completed > 0 {
            self.status = BatchStatus::Completed;
        } else {
            self.status = BatchStatus::Failed;
            self.error_message = Some(format!("All {} tasks failed", self.counts.total));
        }
    }

    /// Mean child progress; terminal children count as 100.
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        if self.children.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let total = self.children.len() as f64;
        let sum: f64 = self
            .children
            .values()
            .map(|c| {
                if c.status.is_terminal() {
                    100.0
                } else {
                    c.progress.min(RUNNING_PROGRESS_CAP)
                }
            })
            .sum();
        sum / total
    }

    /// Description of where the batch is.
    #[must_use]
    pub fn current_step(&self) -> String {
        match self.status {
            BatchStatus::Pending => "Queued".to_string(),
            BatchStatus::Running => format!(
                "Generated {}/{} ({} running)",
                self.counts.terminal(),
                self.counts.total,
                self.counts.running
            ),
            BatchStatus::Completed => format!("Completed: {} succeeded, {} failed", self.counts.completed, self.counts.failed),
            BatchStatus::Failed => "All tasks failed".to_string(),
            BatchStatus::Cancelled => "Cancelled".to_string(),
        }
    }

    /// Returns a serializable view of the aggregate.
    #[must_use]
    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            total: self.counts.total,
            completed_count: self.counts.completed,
            failed_count: self.counts.failed,
            cancelled_count: self.counts.cancelled,
            progress_percentage: self.progress_percentage(),
            current_step: self.current_step(),
            task_ids: self.task_ids.clone(),
            results: self.results.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            estimated_completion: self.estimated_completion,
        }
    }
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// Batch id.
    pub id: Uuid,
    /// Batch name.
    pub name: String,
    /// Status.
    pub status: BatchStatus,
    /// Number of child tasks.
    pub total: usize,
    /// Succeeded children.
    pub completed_count: usize,
    /// Failed children.
    pub failed_count: usize,
    /// Cancelled children.
    pub cancelled_count: usize,
    /// Weighted progress in `[0, 100]`.
    pub progress_percentage: f64,
    /// Description of the current step.
    pub current_step: String,
    /// Child ids in variant order.
    pub task_ids: Vec<Uuid>,
    /// Summaries of terminal children, in completion order.
    pub results: Vec<TaskSummary>,
    /// Failure or cancellation reason.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// When the first pipeline was dispatched.
    pub started_at: Option<Timestamp>,
    /// When the last child became terminal.
    pub completed_at: Option<Timestamp>,
    /// Rough finish estimate from the per-task estimate.
    pub estimated_completion: Option<Timestamp>,
}

impl BatchSnapshot {
    /// Returns true when the batch is final and every child is terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(task_id: Uuid, status: TaskStatus) -> TaskSummary {
        TaskSummary {
            task_id,
            name: "t".to_string(),
            status,
            title: None,
            chapter_count: 0,
            total_length: 0,
            error: None,
        }
    }

    fn batch(n: usize) -> (BatchJob, Vec<Uuid>) {
        let ids: Vec<Uuid> = (0..n).map(|_| generate_id()).collect();
        (BatchJob::new("test", ids.clone(), Duration::from_secs(300)), ids)
    }

    #[test]
    fn test_completed_when_any_succeeds() {
        let (mut job, ids) = batch(3);
        job.start();
        job.observe_terminal(summary(ids[0], TaskStatus::Failed));
        job.observe_terminal(summary(ids[1], TaskStatus::Succeeded));
        assert_eq!(job.status(), BatchStatus::Running);
        job.observe_terminal(summary(ids[2], TaskStatus::Failed));

        assert_eq!(job.status(), BatchStatus::Completed);
        assert_eq!(
            job.counts(),
            BatchCounts {
                total: 3,
                completed: 1,
                failed: 2,
                cancelled: 0,
                running: 0
            }
        );
        assert!(job.snapshot().is_finished());
    }

    #[test]
    fn test_failed_when_none_succeed() {
        let (mut job, ids) = batch(2);
        job.start();
        for id in &ids {
            job.observe_terminal(summary(*id, TaskStatus::Failed));
        }
        assert_eq!(job.status(), BatchStatus::Failed);
        assert!(job.snapshot().error_message.is_some());
    }

    #[test]
    fn test_duplicate_terminal_ignored() {
        let (mut job, ids) = batch(2);
        assert!(job.observe_terminal(summary(ids[0], TaskStatus::Succeeded)));
        assert!(!job.observe_terminal(summary(ids[0], TaskStatus::Failed)));
        assert_eq!(job.counts().completed, 1);
        assert_eq!(job.counts().failed, 0);
    }

    #[test]
    fn test_progress_capped_until_terminal() {
        let (mut job, ids) = batch(2);
        job.start();
        job.observe_running(ids[0]);
        job.observe_progress(ids[0], 100.0);
        job.observe_terminal(summary(ids[1], TaskStatus::Succeeded));

        assert!(job.progress_percentage() < 100.0);
        job.observe_terminal(summary(ids[0], TaskStatus::Succeeded));
        assert!((job.progress_percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancelled_stays_cancelled() {
        let (mut job, ids) = batch(2);
        job.start();
        job.observe_terminal(summary(ids[0], TaskStatus::Succeeded));
        assert!(job.cancel("user request"));
        job.observe_terminal(summary(ids[1], TaskStatus::Cancelled));

        assert_eq!(job.status(), BatchStatus::Cancelled);
        assert_eq!(job.counts().completed, 1);
        assert!(job.snapshot().completed_at.is_some());
    }

    #[test]
    fn test_estimate_from_total() {
        let (mut job, _) = batch(4);
        job.start();
        let snap = job.snapshot();
        let started = snap.started_at.unwrap();
        let eta = snap.estimated_completion.unwrap();
        assert_eq!((eta - started).num_minutes(), 20);
    }

    #[test]
    fn test_unknown_child_ignored() {
        let (mut job, _) = batch(1);
        assert!(!job.observe_terminal(summary(generate_id(), TaskStatus::Succeeded)));
        assert!(!job.observe_running(generate_id()));
    }
}
