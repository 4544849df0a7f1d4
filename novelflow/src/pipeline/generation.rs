//! The per-variant state machine: Settings, Outline, Chapters, Assembly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::fanout::ChapterFanOut;
use super::progress::ProgressReporter;
use super::retry::with_retry_if;
use crate::cancellation::CancellationToken;
use crate::completion::CompletionFn;
use crate::config::GeneratorConfig;
use crate::core::{FailureKind, ParsedArtifact, PipelineStage, PipelineTask, StageFailure, StageKind, StageOutcome};
use crate::events::{EventSink, GenerationEvent};
use crate::stages::{assemble, OutlineStage, SettingsStage, StageDefinition, StageInputs, StageRunner};
use crate::store::{ProgressUpdate, TaskStore};
use crate::utils::now_utc;

/// Drives one task from `Pending` to a terminal state.
///
/// Each stage starts only after the previous one succeeded. Settings and
/// outline retry transient call errors; nothing else is retried.
/// Cancellation is observed at stage boundaries.
#[derive(Clone)]
pub struct GenerationPipeline {
    runner: StageRunner,
    fan_out: ChapterFanOut,
    outline: OutlineStage,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    config: Arc<GeneratorConfig>,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("runner", &self.runner)
            .field("fan_out", &self.fan_out)
            .finish_non_exhaustive()
    }
}

enum Halt {
    Failed(StageFailure),
    Cancelled(String),
}

impl GenerationPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        completion: Arc<dyn CompletionFn>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
        config: Arc<GeneratorConfig>,
    ) -> Self {
        let runner = StageRunner::new(completion, Arc::clone(&config));
        Self {
            fan_out: ChapterFanOut::new(runner.clone(), config.fan_out_width),
            outline: OutlineStage::new(config.default_chapter_length),
            runner,
            store,
            events,
            config,
        }
    }

    /// Runs `task` to a terminal state and records the result.
    ///
    /// A task that is no longer pending in the store (cancelled before a
    /// worker picked it up) is returned as stored, without running.
    pub async fn run(&self, task: PipelineTask, token: CancellationToken) -> PipelineTask {
        let span = info_span!(
            "pipeline",
            task_id = %task.id,
            batch_id = %task.batch_id,
            variant = task.variant_index
        );
        self.execute(task, token).instrument(span).await
    }

    async fn execute(&self, mut task: PipelineTask, token: CancellationToken) -> PipelineTask {
        match self.store.mark_running(task.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Task is no longer pending, skipping");
                return self.store.get_task(task.id).await.unwrap_or(task);
            }
            Err(e) => warn!(error = %e, "Failed to mark task running, continuing"),
        }

        let reporter = ProgressReporter::new(task.id, Arc::clone(&self.store), Arc::clone(&self.events));
        self.events.try_emit(GenerationEvent::TaskStarted {
            batch_id: task.batch_id,
            task_id: task.id,
        });
        info!(name = %task.name, "Pipeline started");

        let outcome = self.drive(&mut task, &token, &reporter).await;
        task.advance_progress(reporter.last());
        match outcome {
            Ok(()) => {
                task.transition(PipelineStage::Succeeded);
                info!("Pipeline succeeded");
            }
            Err(Halt::Failed(failure)) => {
                if token.is_cancelled() {
                    task.cancel(token.reason().unwrap_or_else(|| "cancelled".to_string()));
                } else {
                    warn!(stage = %failure.stage, kind = %failure.kind, reason = %failure.reason, "Pipeline failed");
                    reporter.stage_failed(&failure);
                    task.fail(failure);
                }
            }
            Err(Halt::Cancelled(reason)) => {
                info!(reason = %reason, "Pipeline cancelled");
                task.cancel(reason);
            }
        }

        match self.store.record_result(task.clone()).await {
            Ok(true) => {}
            Ok(false) => debug!("Store already held a terminal result"),
            Err(e) => warn!(error = %e, "Failed to record task result"),
        }
        self.events.try_emit(GenerationEvent::TaskFinished {
            batch_id: task.batch_id,
            task_id: task.id,
            status: task.status,
        });
        task
    }

    async fn drive(
        &self,
        task: &mut PipelineTask,
        token: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<(), Halt> {
        let inputs = StageInputs::new(Arc::new(task.params.clone()));

        enter(task, PipelineStage::Settings, token, reporter)?;
        let settings = self
            .run_with_retry(task, &SettingsStage, &inputs, token)
            .await
            .map_err(Halt::Failed)?
            .into_settings()
            .ok_or_else(|| Halt::Failed(wrong_artifact(StageKind::Settings)))?;
        task.artifacts.settings = Some(settings.clone());
        let inputs = inputs.with_settings(Arc::new(settings));

        enter(task, PipelineStage::Outline, token, reporter)?;
        let outline = self
            .run_with_retry(task, &self.outline, &inputs, token)
            .await
            .map_err(Halt::Failed)?
            .into_outline()
            .ok_or_else(|| Halt::Failed(wrong_artifact(StageKind::Outline)))?;
        task.artifacts.outline = Some(outline.clone());
        let inputs = inputs.with_outline(Arc::new(outline));

        enter(task, PipelineStage::Chapters, token, reporter)?;
        let started_at = now_utc();
        let report = match self.fan_out.run(&inputs, token, reporter).await {
            Ok(report) => report,
            Err(failure) => {
                task.record_stage(StageKind::Chapter, 0, started_at, outcome_of(&failure));
                return Err(Halt::Failed(failure));
            }
        };
        let attempts = u32::try_from(report.dispatched()).unwrap_or(u32::MAX);
        task.record_stage(StageKind::Chapter, attempts, started_at, StageOutcome::Succeeded);
        self.events.try_emit(GenerationEvent::StageCompleted {
            task_id: task.id,
            stage: StageKind::Chapter,
            attempts,
        });
        task.artifacts.chapters = report.chapters;
        task.artifacts.chapter_failures = report.failures;

        enter(task, PipelineStage::Assembly, token, reporter)?;
        let started_at = now_utc();
        let assembled = assemble(
            task.artifacts.settings.as_ref(),
            task.artifacts.outline.as_ref(),
            &task.artifacts.chapters,
        )
        .map_err(|e| {
            let failure = StageFailure::from_validation(&e);
            task.record_stage(StageKind::Assembly, 1, started_at, outcome_of(&failure));
            Halt::Failed(failure)
        })?;
        if !assembled.missing_chapters.is_empty() {
            warn!(missing = ?assembled.missing_chapters, "Manuscript assembled with gaps");
        }
        task.record_stage(StageKind::Assembly, 1, started_at, StageOutcome::Succeeded);
        task.artifacts.assembled = Some(assembled);
        Ok(())
    }

    async fn run_with_retry(
        &self,
        task: &mut PipelineTask,
        definition: &dyn StageDefinition,
        inputs: &StageInputs,
        token: &CancellationToken,
    ) -> Result<ParsedArtifact, StageFailure> {
        let stage = definition.kind();
        let started_at = now_utc();
        let attempts = AtomicU32::new(0);
        let key = format!("{}:{stage}", task.id);
        let task_id = task.id;

        let result = with_retry_if(
            &self.config.retry,
            &key,
            token,
            StageFailure::is_retryable,
            |attempt| {
                attempts.store(attempt, Ordering::SeqCst);
                let runner = &self.runner;
                let events = &self.events;
                async move {
                    events.try_emit(GenerationEvent::StageStarted {
                        task_id,
                        stage,
                        attempt,
                    });
                    runner.run(definition, inputs, attempt).await.into_result()
                }
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match &result {
            Ok(_) => {
                task.record_stage(stage, attempts, started_at, StageOutcome::Succeeded);
                self.events.try_emit(GenerationEvent::StageCompleted {
                    task_id,
                    stage,
                    attempts,
                });
            }
            Err(failure) => task.record_stage(stage, attempts, started_at, outcome_of(failure)),
        }
        result
    }
}

/// Checks the cancellation boundary, then moves to `stage`.
fn enter(
    task: &mut PipelineTask,
    stage: PipelineStage,
    token: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<(), Halt> {
    if token.is_cancelled() {
        return Err(Halt::Cancelled(
            token.reason().unwrap_or_else(|| "cancelled".to_string()),
        ));
    }
    task.transition(stage);
    reporter.report(ProgressUpdate::entering(stage));
    Ok(())
}

fn wrong_artifact(stage: StageKind) -> StageFailure {
    StageFailure::new(stage, FailureKind::Internal, "stage produced an artifact of the wrong kind")
}

fn outcome_of(failure: &StageFailure) -> StageOutcome {
    match failure.kind {
        FailureKind::Cancelled => StageOutcome::Cancelled,
        _ => StageOutcome::Failed {
            reason: failure.to_string(),
        },
    }
}
