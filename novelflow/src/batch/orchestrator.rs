//! Background execution of batches.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::request::BatchRequest;
use crate::cancellation::CancellationToken;
use crate::completion::CompletionFn;
use crate::config::GeneratorConfig;
use crate::core::{BatchJob, BatchSnapshot, BatchStatus, FailureKind, PipelineTask, StageFailure, StageKind};
use crate::errors::{ConfigError, NovelflowError, StoreError};
use crate::events::{EventSink, GenerationEvent, NoOpEventSink};
use crate::pipeline::GenerationPipeline;
use crate::store::{InMemoryTaskStore, TaskStore};
use crate::utils::generate_id;
use crate::workers::{UnitOutcome, WorkerPool};

struct BatchRun {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

struct Inner {
    pipeline: GenerationPipeline,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    config: Arc<GeneratorConfig>,
    runs: DashMap<Uuid, BatchRun>,
    task_tokens: DashMap<Uuid, CancellationToken>,
}

/// Runs batches of generation pipelines in the background.
///
/// Submission validates the request, persists the batch with its tasks and
/// returns immediately. Pipelines run on a pool of `pipeline_pool_width`
/// workers; all aggregation happens in the task store.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("pipeline_pool_width", &self.inner.config.pipeline_pool_width)
            .field("active_batches", &self.inner.runs.len())
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found by
    /// [`GeneratorConfig::validate`].
    pub fn new(
        completion: Arc<dyn CompletionFn>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
        config: GeneratorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let pipeline = GenerationPipeline::new(completion, Arc::clone(&store), Arc::clone(&events), Arc::clone(&config));
        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                store,
                events,
                config,
                runs: DashMap::new(),
                task_tokens: DashMap::new(),
            }),
        })
    }

    /// Creates an orchestrator with an in-memory store and no event sink.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid configuration.
    pub fn in_memory(completion: Arc<dyn CompletionFn>, config: GeneratorConfig) -> Result<Self, ConfigError> {
        Self::new(
            completion,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(NoOpEventSink),
            config,
        )
    }

    /// Number of batches still running in the background.
    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.inner.runs.len()
    }

    /// The store backing this orchestrator.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Validates and persists a batch, then starts it in the background.
    ///
    /// Nothing is stored when validation fails.
    ///
    /// # Errors
    ///
    /// Returns [`NovelflowError::Config`] for an invalid request and
    /// [`NovelflowError::Store`] when the store rejects the batch.
    pub async fn submit(&self, request: BatchRequest) -> Result<Uuid, NovelflowError> {
        let variants = request.resolve()?;
        let batch_id = generate_id();

        let tasks: Vec<PipelineTask> = variants
            .into_iter()
            .enumerate()
            .map(|(index, params)| {
                let name = format!("{} #{} ({})", request.name, index + 1, params.label());
                PipelineTask::new(batch_id, name, index, params)
            })
            .collect();
        let task_ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();

        let store = &self.inner.store;
        store
            .create_batch(BatchJob::with_id(
                batch_id,
                request.name.clone(),
                task_ids,
                self.inner.config.per_task_estimate(),
            ))
            .await?;
        for task in &tasks {
            store.create_task(task.clone()).await?;
        }

        let token = CancellationToken::new();
        let dispatch: Vec<(PipelineTask, CancellationToken)> = tasks
            .into_iter()
            .map(|task| {
                let child = token.child();
                self.inner.task_tokens.insert(task.id, child.clone());
                (task, child)
            })
            .collect();

        let (done_tx, done_rx) = watch::channel(false);
        self.inner.runs.insert(
            batch_id,
            BatchRun {
                token: token.clone(),
                done: done_rx,
            },
        );

        info!(batch_id = %batch_id, name = %request.name, total = dispatch.len(), "Batch submitted");
        self.inner.events.try_emit(GenerationEvent::BatchSubmitted {
            batch_id,
            name: request.name.clone(),
            total: dispatch.len(),
        });

        let inner = Arc::clone(&self.inner);
        let span = info_span!("batch", batch_id = %batch_id, name = %request.name);
        tokio::spawn(
            async move {
                run_batch(&inner, batch_id, dispatch, &token).await;
                let _ = done_tx.send(true);
                inner.runs.remove(&batch_id);
            }
            .instrument(span),
        );
        Ok(batch_id)
    }

    /// Waits until every task of the batch is terminal and returns the final
    /// snapshot.
    ///
    /// A batch that already finished is answered from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BatchNotFound`] for an unknown batch.
    pub async fn wait(&self, batch_id: Uuid) -> Result<BatchSnapshot, StoreError> {
        let done = self.inner.runs.get(&batch_id).map(|run| run.done.clone());
        if let Some(mut done) = done {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }
        self.inner.store.get_batch(batch_id).await
    }

    /// Submits a batch and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the submission error, if any.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchSnapshot, NovelflowError> {
        let batch_id = self.submit(request).await?;
        Ok(self.wait(batch_id).await?)
    }

    /// Cancels a batch.
    ///
    /// Pending tasks become cancelled immediately and running pipelines stop
    /// at their next stage boundary. Tasks that already succeeded keep their
    /// results. Returns the ids of the tasks cancelled before they started.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BatchNotFound`] for an unknown batch.
    pub async fn cancel_batch(&self, batch_id: Uuid, reason: &str) -> Result<Vec<Uuid>, StoreError> {
        if let Some(run) = self.inner.runs.get(&batch_id) {
            run.token.cancel(reason);
        }
        let cancelled = self.inner.store.cancel_pending(batch_id, reason).await?;
        info!(batch_id = %batch_id, reason, pending_cancelled = cancelled.len(), "Batch cancelled");
        self.inner.events.try_emit(GenerationEvent::BatchCancelled {
            batch_id,
            reason: reason.to_string(),
        });
        Ok(cancelled)
    }

    /// Cancels one task without touching its siblings.
    ///
    /// Returns true when the task was still pending and is now cancelled; a
    /// running task is signalled and stops at its next stage boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] for an unknown task.
    pub async fn cancel_task(&self, task_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        if let Some(token) = self.inner.task_tokens.get(&task_id) {
            token.cancel(reason);
        }
        let cancelled = self.inner.store.cancel_pending_task(task_id, reason).await?;
        debug!(task_id = %task_id, reason, cancelled, "Task cancel requested");
        Ok(cancelled)
    }

    /// Current view of a batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BatchNotFound`] for an unknown batch.
    pub async fn snapshot(&self, batch_id: Uuid) -> Result<BatchSnapshot, StoreError> {
        self.inner.store.get_batch(batch_id).await
    }

    /// Snapshots of every known batch, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn list_batches(&self) -> Result<Vec<BatchSnapshot>, StoreError> {
        self.inner.store.list_batches().await
    }

    /// Every task of a batch, in variant order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BatchNotFound`] for an unknown batch.
    pub async fn tasks(&self, batch_id: Uuid) -> Result<Vec<PipelineTask>, StoreError> {
        self.inner.store.list_tasks(batch_id).await
    }

    /// One task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] for an unknown task.
    pub async fn get_task(&self, task_id: Uuid) -> Result<PipelineTask, StoreError> {
        self.inner.store.get_task(task_id).await
    }
}

async fn run_batch(
    inner: &Arc<Inner>,
    batch_id: Uuid,
    dispatch: Vec<(PipelineTask, CancellationToken)>,
    token: &CancellationToken,
) {
    if let Err(e) = inner.store.set_batch_status(batch_id, BatchStatus::Running, None).await {
        warn!(error = %e, "Failed to mark batch running");
    }
    let task_ids: Vec<Uuid> = dispatch.iter().map(|(task, _)| task.id).collect();

    let pool = WorkerPool::new("pipelines", inner.config.pipeline_pool_width);
    let outcomes = pool
        .run_all(dispatch, token, |(task, task_token)| {
            let pipeline = inner.pipeline.clone();
            async move { pipeline.run(task, task_token).await }
        })
        .await;

    for (task_id, outcome) in task_ids.iter().zip(outcomes) {
        if let UnitOutcome::Panicked(message) = outcome {
            record_panic(inner, *task_id, &message).await;
        }
    }

    if token.is_cancelled() {
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        if let Err(e) = inner.store.cancel_pending(batch_id, &reason).await {
            warn!(error = %e, "Failed to cancel undispatched tasks");
        }
    }

    for task_id in &task_ids {
        inner.task_tokens.remove(task_id);
    }

    match inner.store.get_batch(batch_id).await {
        Ok(snapshot) => {
            info!(
                status = %snapshot.status,
                completed = snapshot.completed_count,
                failed = snapshot.failed_count,
                cancelled = snapshot.cancelled_count,
                "Batch finished"
            );
            inner.events.try_emit(GenerationEvent::BatchFinished {
                batch_id,
                status: snapshot.status,
                completed: snapshot.completed_count,
                failed: snapshot.failed_count,
                cancelled: snapshot.cancelled_count,
            });
        }
        Err(e) => error!(error = %e, "Batch vanished from the store"),
    }
}

async fn record_panic(inner: &Inner, task_id: Uuid, message: &str) {
    error!(task_id = %task_id, message, "Pipeline worker panicked");
    let mut task = match inner.store.get_task(task_id).await {
        Ok(task) => task,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Cannot record panic for unknown task");
            return;
        }
    };
    let stage = task.stage.stage_kind().unwrap_or(StageKind::Settings);
    if task.fail(StageFailure::new(
        stage,
        FailureKind::Internal,
        format!("pipeline panicked: {message}"),
    )) {
        if let Err(e) = inner.store.record_result(task).await {
            warn!(task_id = %task_id, error = %e, "Failed to record panicked task");
        }
    }
}
