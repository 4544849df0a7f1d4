//! Best-effort progress reporting for one task.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{StageFailure, StageResult};
use crate::events::{EventSink, GenerationEvent};
use crate::store::{ProgressUpdate, TaskStore};

/// Writes progress to the store and mirrors it as events.
///
/// Reports below the high-water mark are dropped. Store writes happen on a
/// background writer that only ever persists the latest report, so a slow
/// store never holds up the stage that reported. Store errors are logged
/// and never surface to the pipeline.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Uuid,
    events: Arc<dyn EventSink>,
    high_water: Arc<Mutex<f64>>,
    pending: Arc<watch::Sender<Option<ProgressUpdate>>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("high_water", &self.last())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter for `task_id` and starts its store writer.
    ///
    /// Must be called inside a Tokio runtime. The writer exits once every
    /// clone of the reporter is dropped and the last report is persisted.
    #[must_use]
    pub fn new(task_id: Uuid, store: Arc<dyn TaskStore>, events: Arc<dyn EventSink>) -> Self {
        let (pending, updates) = watch::channel(None);
        tokio::spawn(write_progress(task_id, store, updates));
        Self {
            task_id,
            events,
            high_water: Arc::new(Mutex::new(0.0)),
            pending: Arc::new(pending),
        }
    }

    /// The task being reported on.
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Highest progress reported so far.
    #[must_use]
    pub fn last(&self) -> f64 {
        *self.high_water.lock()
    }

    /// Reports `update` if it does not move progress backward.
    pub fn report(&self, update: ProgressUpdate) {
        {
            let mut high_water = self.high_water.lock();
            if update.progress < *high_water {
                return;
            }
            *high_water = update.progress;
        }

        let progress = update.progress;
        let step = update.step.clone();
        self.pending.send_replace(Some(update));
        self.events.try_emit(GenerationEvent::Progress {
            task_id: self.task_id,
            progress,
            step,
        });
    }

    /// Emits the event for a finished chapter unit.
    pub fn chapter_finished(&self, result: &StageResult) {
        let event = match result {
            StageResult::Success(artifact) => match artifact.clone().into_chapter() {
                Some(chapter) => GenerationEvent::ChapterCompleted {
                    task_id: self.task_id,
                    index: chapter.index,
                    length: chapter.length,
                },
                None => return,
            },
            StageResult::Failure(failure) => GenerationEvent::ChapterFailed {
                task_id: self.task_id,
                failure: failure.clone(),
            },
        };
        self.events.try_emit(event);
    }

    /// Emits a stage failure event.
    pub fn stage_failed(&self, failure: &StageFailure) {
        self.events.try_emit(GenerationEvent::StageFailed {
            task_id: self.task_id,
            failure: failure.clone(),
        });
    }
}

async fn write_progress(
    task_id: Uuid,
    store: Arc<dyn TaskStore>,
    mut updates: watch::Receiver<Option<ProgressUpdate>>,
) {
    while updates.changed().await.is_ok() {
        let latest = updates.borrow_and_update().clone();
        if let Some(update) = latest {
            if let Err(e) = store.update_progress(task_id, update).await {
                warn!(task_id = %task_id, error = %e, "Failed to persist progress");
            }
        }
    }
    debug!(task_id = %task_id, "Progress writer finished");
}
