//! End-to-end tests: orchestrator, pipelines, fan-out and store together.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::assert_ok;
use uuid::Uuid;

use super::{BatchOrchestrator, BatchRequest};
use crate::config::GeneratorConfig;
use crate::core::{BatchJob, BatchSnapshot, BatchStatus, FailureKind, PipelineTask, StageKind, TaskStatus};
use crate::errors::{CallError, NovelflowError, StoreError};
use crate::events::CollectingEventSink;
use crate::pipeline::RetryConfig;
use crate::store::{InMemoryTaskStore, ProgressUpdate, TaskStore};
use crate::testing::{
    assert_batch_counts, assert_task_failed_at, assert_task_succeeded, chapter_text, novel_response, params_map,
    ScriptedCompletion,
};

/// Store wrapper that checks batch invariants after every write.
#[derive(Default)]
struct AuditingStore {
    inner: InMemoryTaskStore,
    running: AtomicUsize,
    max_running: AtomicUsize,
    violations: Mutex<Vec<String>>,
}

impl AuditingStore {
    async fn audit(&self, batch_id: Uuid) {
        let Ok(snapshot) = self.inner.get_batch(batch_id).await else {
            return;
        };
        let terminal = snapshot.completed_count + snapshot.failed_count + snapshot.cancelled_count;
        if terminal > snapshot.total {
            self.violations.lock().push(format!("counts exceed total: {snapshot:?}"));
        }
        if snapshot.progress_percentage >= 100.0 && terminal < snapshot.total {
            self.violations
                .lock()
                .push(format!("progress 100 with {terminal}/{} terminal", snapshot.total));
        }
    }

    fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }
}

#[async_trait]
impl TaskStore for AuditingStore {
    async fn create_batch(&self, batch: BatchJob) -> Result<(), StoreError> {
        self.inner.create_batch(batch).await
    }

    async fn create_task(&self, task: PipelineTask) -> Result<(), StoreError> {
        self.inner.create_task(task).await
    }

    async fn mark_running(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let started = self.inner.mark_running(task_id).await?;
        if started {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
        }
        Ok(started)
    }

    async fn update_progress(&self, task_id: Uuid, update: ProgressUpdate) -> Result<(), StoreError> {
        self.inner.update_progress(task_id, update).await?;
        let batch_id = self.inner.get_task(task_id).await?.batch_id;
        self.audit(batch_id).await;
        Ok(())
    }

    async fn record_result(&self, task: PipelineTask) -> Result<bool, StoreError> {
        let batch_id = task.batch_id;
        let was_running = self.inner.get_task(task.id).await?.status == TaskStatus::Running;
        let recorded = self.inner.record_result(task).await?;
        if recorded && was_running {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        self.audit(batch_id).await;
        Ok(recorded)
    }

    async fn set_batch_status(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        reason: Option<String>,
    ) -> Result<bool, StoreError> {
        self.inner.set_batch_status(batch_id, status, reason).await
    }

    async fn cancel_pending(&self, batch_id: Uuid, reason: &str) -> Result<Vec<Uuid>, StoreError> {
        let cancelled = self.inner.cancel_pending(batch_id, reason).await?;
        self.audit(batch_id).await;
        Ok(cancelled)
    }

    async fn cancel_pending_task(&self, task_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        self.inner.cancel_pending_task(task_id, reason).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<PipelineTask, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn list_tasks(&self, batch_id: Uuid) -> Result<Vec<PipelineTask>, StoreError> {
        self.inner.list_tasks(batch_id).await
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<BatchSnapshot, StoreError> {
        self.inner.get_batch(batch_id).await
    }

    async fn list_batches(&self) -> Result<Vec<BatchSnapshot>, StoreError> {
        self.inner.list_batches().await
    }
}

fn config(pipeline_pool_width: usize) -> GeneratorConfig {
    GeneratorConfig {
        pipeline_pool_width,
        retry: RetryConfig::new().with_base_delay_ms(1),
        ..GeneratorConfig::default()
    }
}

struct Harness {
    orchestrator: BatchOrchestrator,
    completion: Arc<ScriptedCompletion>,
    store: Arc<AuditingStore>,
    events: Arc<CollectingEventSink>,
}

fn harness(completion: ScriptedCompletion, pipeline_pool_width: usize) -> Harness {
    let completion = Arc::new(completion);
    let store = Arc::new(AuditingStore::default());
    let events = Arc::new(CollectingEventSink::new());
    let orchestrator = BatchOrchestrator::new(
        completion.clone(),
        store.clone(),
        events.clone(),
        config(pipeline_pool_width),
    )
    .unwrap();
    Harness {
        orchestrator,
        completion,
        store,
        events,
    }
}

fn request(variants: usize, chapters: usize) -> BatchRequest {
    BatchRequest::new("integration")
        .with_base(params_map(json!({"genre": "romance", "chapterCount": chapters})))
        .with_copies(variants)
}

#[tokio::test]
async fn test_ten_chapters_with_three_failures() {
    let completion = ScriptedCompletion::new(|request| match request.unit {
        Some(3 | 6 | 9) => Err(CallError::timeout(Duration::from_secs(120))),
        _ => Ok(novel_response(request, 10)),
    });
    let h = harness(completion, 1);

    let snapshot = h.orchestrator.run(request(1, 10)).await.unwrap();

    assert_eq!(snapshot.status, BatchStatus::Completed);
    let task = h.orchestrator.get_task(snapshot.task_ids[0]).await.unwrap();
    assert_task_succeeded(&task);
    let assembled = task.artifacts.assembled.unwrap();
    let indices: Vec<usize> = assembled.chapters.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![1, 2, 4, 5, 7, 8, 10]);
    assert_eq!(assembled.missing_chapters, vec![3, 6, 9]);
    assert_eq!(task.artifacts.chapter_failures.len(), 3);
    assert!(task
        .artifacts
        .chapter_failures
        .iter()
        .all(|f| f.kind == FailureKind::Timeout && f.unit.is_some()));
    assert_eq!(h.completion.calls_for(StageKind::Chapter), 10);
}

#[tokio::test]
async fn test_five_variants_on_width_two() {
    let completion = ScriptedCompletion::new(|request| {
        if request.stage == StageKind::Settings && request.prompt.contains("Genre: horror") {
            return Err(CallError::permanent("HTTP 400: content policy"));
        }
        Ok(novel_response(request, 3))
    })
    .with_latency(Duration::from_millis(2));
    let h = harness(completion, 2);
    let request = request(4, 3).with_variant(params_map(json!({"genre": "horror"})));

    let batch_id = h.orchestrator.submit(request).await.unwrap();
    let snapshot = h.orchestrator.wait(batch_id).await.unwrap();

    assert_eq!(snapshot.status, BatchStatus::Completed);
    assert_batch_counts(&snapshot, 4, 1, 0);
    assert_eq!(snapshot.completed_count + snapshot.failed_count, 5);
    assert!((snapshot.progress_percentage - 100.0).abs() < f64::EPSILON);
    assert!(snapshot.is_finished());
    assert_eq!(snapshot.results.len(), 5);

    assert!(h.store.max_running.load(Ordering::SeqCst) <= 2);
    assert!(h.store.violations().is_empty(), "{:?}", h.store.violations());

    let tasks = h.orchestrator.tasks(batch_id).await.unwrap();
    assert!(tasks.iter().all(PipelineTask::is_terminal));
    assert_task_failed_at(&tasks[4], StageKind::Settings, FailureKind::Call { transient: false });
    assert_eq!(h.events.events_of_type("batch.finished").len(), 1);
    assert_eq!(h.events.events_of_type("task.finished").len(), 5);
}

#[tokio::test]
async fn test_settings_failure_isolated_to_its_task() {
    let completion = ScriptedCompletion::new(|request| {
        if request.stage == StageKind::Settings && request.prompt.contains("Genre: noir") {
            return Ok("I'd rather not.".to_string());
        }
        Ok(novel_response(request, 2))
    });
    let h = harness(completion, 3);
    let request = BatchRequest::new("isolation")
        .with_base(params_map(json!({"chapterCount": 2})))
        .with_variant(params_map(json!({"genre": "romance"})))
        .with_variant(params_map(json!({"genre": "noir"})))
        .with_variant(params_map(json!({"genre": "fantasy"})));

    let snapshot = h.orchestrator.run(request).await.unwrap();

    assert_batch_counts(&snapshot, 2, 1, 0);
    let tasks = h.orchestrator.tasks(snapshot.id).await.unwrap();
    assert_task_failed_at(&tasks[1], StageKind::Settings, FailureKind::Parse);
    for sibling in [&tasks[0], &tasks[2]] {
        assert_task_succeeded(sibling);
        let assembled = sibling.artifacts.assembled.as_ref().unwrap();
        assert_eq!(assembled.title, "The Anchor's Return");
        assert_eq!(assembled.chapters.len(), 2);
        assert!(sibling.failure.is_none());
    }
}

#[tokio::test]
async fn test_cancel_mid_flight_keeps_finished_work() {
    let reached = Arc::new(Notify::new());
    let signal = reached.clone();
    let settings_calls = Arc::new(AtomicUsize::new(0));
    let counter = settings_calls.clone();
    let completion = ScriptedCompletion::new(move |request| {
        if request.stage == StageKind::Settings && counter.fetch_add(1, Ordering::SeqCst) == 1 {
            signal.notify_one();
        }
        Ok(novel_response(request, 2))
    })
    .with_latency(Duration::from_millis(30));
    let h = harness(completion, 1);

    let batch_id = h.orchestrator.submit(request(4, 2)).await.unwrap();
    reached.notified().await;
    let cancelled = h.orchestrator.cancel_batch(batch_id, "operator stop").await.unwrap();
    let snapshot = h.orchestrator.wait(batch_id).await.unwrap();

    assert_eq!(cancelled.len(), 2);
    assert_eq!(snapshot.status, BatchStatus::Cancelled);
    assert_batch_counts(&snapshot, 1, 0, 3);
    assert_eq!(snapshot.error_message.as_deref(), Some("operator stop"));

    let tasks = h.orchestrator.tasks(batch_id).await.unwrap();
    assert_task_succeeded(&tasks[0]);
    assert!(tasks[0].artifacts.assembled.is_some());
    assert_eq!(tasks[1].status, TaskStatus::Cancelled);
    assert!(tasks[1].artifacts.settings.is_some());
    for pending in &tasks[2..] {
        assert_eq!(pending.status, TaskStatus::Cancelled);
        assert!(pending.started_at.is_none());
        assert!(pending.history.is_empty());
    }
    assert_eq!(h.completion.calls_for(StageKind::Settings), 2);
    assert_eq!(h.events.events_of_type("batch.cancelled").len(), 1);
}

#[tokio::test]
async fn test_cancel_single_pending_task() {
    let completion = ScriptedCompletion::novel(1).with_latency(Duration::from_millis(5));
    let h = harness(completion, 1);

    let batch_id = h.orchestrator.submit(request(3, 1)).await.unwrap();
    let snapshot = h.orchestrator.snapshot(batch_id).await.unwrap();
    let last = snapshot.task_ids[2];
    assert!(assert_ok!(h.orchestrator.cancel_task(last, "not needed").await));
    let snapshot = h.orchestrator.wait(batch_id).await.unwrap();

    assert_eq!(snapshot.status, BatchStatus::Completed);
    assert_batch_counts(&snapshot, 2, 0, 1);
    assert_eq!(h.orchestrator.get_task(last).await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_invalid_request_creates_nothing() {
    let h = harness(ScriptedCompletion::novel(2), 2);

    let err = h.orchestrator.submit(BatchRequest::new("empty")).await.unwrap_err();
    assert!(matches!(err, NovelflowError::Config(_)));

    let zero = BatchRequest::new("zero").with_variant(params_map(json!({"chapterCount": 0})));
    assert!(h.orchestrator.submit(zero).await.is_err());

    assert!(h.orchestrator.list_batches().await.unwrap().is_empty());
    assert_eq!(h.completion.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_batch() {
    let h = harness(ScriptedCompletion::novel(1), 1);
    let missing = Uuid::new_v4();
    assert_eq!(
        h.orchestrator.wait(missing).await.unwrap_err(),
        StoreError::BatchNotFound(missing)
    );
    assert!(h.orchestrator.cancel_batch(missing, "x").await.is_err());
}

#[tokio::test]
async fn test_concurrent_batches() {
    let h = harness(ScriptedCompletion::novel(2).with_latency(Duration::from_millis(1)), 2);

    let submissions = futures::future::join_all((0..3).map(|_| h.orchestrator.run(request(2, 2)))).await;

    for snapshot in submissions {
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.status, BatchStatus::Completed);
        assert_batch_counts(&snapshot, 2, 0, 0);
    }
    assert_eq!(h.orchestrator.list_batches().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_in_memory_constructor_rejects_bad_config() {
    let completion = Arc::new(ScriptedCompletion::novel(1));
    let bad = GeneratorConfig {
        pipeline_pool_width: 0,
        ..GeneratorConfig::default()
    };
    assert!(BatchOrchestrator::in_memory(completion.clone(), bad).is_err());

    let orchestrator = BatchOrchestrator::in_memory(completion, config(1)).unwrap();
    let snapshot = orchestrator.run(request(1, 1)).await.unwrap();
    assert_batch_counts(&snapshot, 1, 0, 0);
    let task = orchestrator.get_task(snapshot.task_ids[0]).await.unwrap();
    assert_eq!(task.artifacts.chapters[0].body, chapter_text(1).trim());
}

#[tokio::test]
async fn test_finished_batches_leave_the_run_registry() {
    let h = harness(ScriptedCompletion::novel(1), 2);

    let first = h.orchestrator.run(request(2, 1)).await.unwrap();
    let second = h.orchestrator.run(request(1, 1)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while h.orchestrator.active_batches() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let again = h.orchestrator.wait(first.id).await.unwrap();
    assert_eq!(again.status, BatchStatus::Completed);
    assert_batch_counts(&again, 2, 0, 0);
    assert_eq!(h.orchestrator.wait(second.id).await.unwrap().status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_out_of_order_outline_assembles_by_index() {
    let completion = ScriptedCompletion::new(|request| match request.stage {
        StageKind::Outline => Ok(json!({"chapters": [
            {"index": 2, "title": "Second", "summary": "b"},
            {"index": 1, "title": "First", "summary": "a"}
        ]})
        .to_string()),
        _ => Ok(novel_response(request, 2)),
    });
    let h = harness(completion, 1);

    let snapshot = h.orchestrator.run(request(1, 2)).await.unwrap();

    let task = h.orchestrator.get_task(snapshot.task_ids[0]).await.unwrap();
    assert_task_succeeded(&task);
    let assembled = task.artifacts.assembled.unwrap();
    let indices: Vec<usize> = assembled.chapters.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(assembled.chapters[0].title, "First");
}
