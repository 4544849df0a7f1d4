//! Concurrent chapter generation with partial-failure tolerance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use super::progress::ProgressReporter;
use crate::cancellation::CancellationToken;
use crate::core::{ChapterArtifact, FailureKind, PipelineStage, StageFailure, StageKind, StageResult};
use crate::stages::{ChapterStage, StageInputs, StageRunner};
use crate::store::ProgressUpdate;
use crate::workers::{UnitOutcome, WorkerPool};

/// Outcome of a fan-out that produced at least one chapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Successful chapters in outline order.
    pub chapters: Vec<ChapterArtifact>,
    /// Failed units in outline order.
    pub failures: Vec<StageFailure>,
    /// Indices never dispatched because of cancellation.
    pub skipped: Vec<usize>,
}

impl FanOutReport {
    /// Number of units that ran.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.chapters.len() + self.failures.len()
    }
}

/// Runs one chapter unit per outline entry on a bounded pool.
///
/// Units never see each other's output and are never retried.
#[derive(Debug, Clone)]
pub struct ChapterFanOut {
    runner: StageRunner,
    pool: WorkerPool,
}

impl ChapterFanOut {
    /// Creates a fan-out of the given width.
    #[must_use]
    pub fn new(runner: StageRunner, width: usize) -> Self {
        Self {
            runner,
            pool: WorkerPool::new("chapters", width),
        }
    }

    /// Generates every chapter in `inputs.outline`.
    ///
    /// # Errors
    ///
    /// Returns a chapter-stage failure when no unit succeeded: a cancellation
    /// failure if the token fired, otherwise a summary of the unit failures.
    pub async fn run(
        &self,
        inputs: &StageInputs,
        token: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<FanOutReport, StageFailure> {
        let specs = inputs.outline.as_ref().map(|o| o.chapters.clone()).unwrap_or_default();
        if specs.is_empty() {
            return Err(StageFailure::new(
                StageKind::Chapter,
                FailureKind::Validation,
                "outline has no chapters",
            ));
        }
        let total = specs.len();
        let indices: Vec<usize> = specs.iter().map(|s| s.index).collect();
        let done = Arc::new(AtomicUsize::new(0));
        info!(task_id = %reporter.task_id(), total, width = self.pool.width(), "Starting chapter fan-out");

        let outcomes = self
            .pool
            .run_all(specs, token, |spec| {
                let runner = self.runner.clone();
                let reporter = reporter.clone();
                let done = Arc::clone(&done);
                let span = info_span!("chapter_unit", index = spec.index);
                let unit_inputs = inputs.for_chapter(spec);
                async move {
                    let result = runner.run(&ChapterStage, &unit_inputs, 1).await;
                    reporter.chapter_finished(&result);

                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    #[allow(clippy::cast_precision_loss)]
                    let progress = PipelineStage::Chapters.progress_milestone()
                        + (PipelineStage::Assembly.progress_milestone() - PipelineStage::Chapters.progress_milestone())
                            * finished as f64
                            / total as f64;
                    reporter.report(ProgressUpdate::within(
                        PipelineStage::Chapters,
                        progress,
                        format!("Generated chapter {finished}/{total}"),
                    ));
                    result
                }
                .instrument(span)
            })
            .await;

        let mut report = FanOutReport::default();
        for (index, outcome) in indices.into_iter().zip(outcomes) {
            match outcome {
                UnitOutcome::Completed(StageResult::Success(artifact)) => match artifact.into_chapter() {
                    Some(chapter) => report.chapters.push(chapter),
                    None => report.failures.push(
                        StageFailure::new(StageKind::Chapter, FailureKind::Internal, "unit returned a non-chapter artifact")
                            .with_unit(index),
                    ),
                },
                UnitOutcome::Completed(StageResult::Failure(failure)) => report.failures.push(failure),
                UnitOutcome::Panicked(message) => report.failures.push(
                    StageFailure::new(StageKind::Chapter, FailureKind::Internal, format!("unit panicked: {message}"))
                        .with_unit(index),
                ),
                UnitOutcome::NotDispatched => report.skipped.push(index),
            }
        }

        info!(
            task_id = %reporter.task_id(),
            succeeded = report.chapters.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Chapter fan-out finished"
        );

        if !report.chapters.is_empty() {
            return Ok(report);
        }
        if token.is_cancelled() {
            let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
            return Err(StageFailure::cancelled(StageKind::Chapter, reason));
        }
        let first = report.failures.first().map_or_else(String::new, |f| f.reason.clone());
        warn!(task_id = %reporter.task_id(), total, "Every chapter unit failed");
        let kind = report.failures.first().map_or(FailureKind::Internal, |f| f.kind);
        Err(StageFailure::new(
            StageKind::Chapter,
            kind,
            format!("all {total} chapter units failed; first error: {first}"),
        ))
    }
}
