//! Test assertions for tasks and batches.

use crate::core::{BatchSnapshot, FailureKind, PipelineTask, StageKind, TaskStatus};

/// Asserts that the task succeeded with an assembled manuscript.
pub fn assert_task_succeeded(task: &PipelineTask) {
    assert_eq!(
        task.status,
        TaskStatus::Succeeded,
        "Expected task {} to succeed, got {:?} ({:?})",
        task.id,
        task.status,
        task.failure
    );
    assert!(task.artifacts.assembled.is_some(), "Succeeded task has no manuscript");
    assert!((task.progress - 100.0).abs() < f64::EPSILON, "Succeeded task progress is {}", task.progress);
}

/// Asserts that the task failed at `stage` with a failure of `kind`.
pub fn assert_task_failed_at(task: &PipelineTask, stage: StageKind, kind: FailureKind) {
    assert_eq!(task.status, TaskStatus::Failed, "Expected task {} to fail", task.id);
    let Some(failure) = task.failure.as_ref() else {
        panic!("Failed task {} carries no failure", task.id);
    };
    assert_eq!(failure.stage, stage, "Failed at {} instead of {}", failure.stage, stage);
    assert_eq!(failure.kind, kind, "Failure kind {} instead of {}", failure.kind, kind);
}

/// Asserts the batch counters add up and match the expected values.
pub fn assert_batch_counts(snapshot: &BatchSnapshot, completed: usize, failed: usize, cancelled: usize) {
    assert!(
        snapshot.completed_count + snapshot.failed_count + snapshot.cancelled_count <= snapshot.total,
        "Counts exceed total: {snapshot:?}"
    );
    assert_eq!(
        (snapshot.completed_count, snapshot.failed_count, snapshot.cancelled_count),
        (completed, failed, cancelled),
        "Unexpected counts for batch {}",
        snapshot.id
    );
}
