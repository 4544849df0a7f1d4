//! Bounded-width worker pool.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::cancellation::CancellationToken;

/// What happened to one submitted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome<T> {
    /// The work ran to completion.
    Completed(T),
    /// Cancellation was observed before the item was dispatched.
    NotDispatched,
    /// The work panicked.
    Panicked(String),
}

impl<T> UnitOutcome<T> {
    /// Returns the value if the work completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Runs items with at most `width` in flight.
///
/// The same pool type drives both pipelines within a batch and chapter units
/// within a pipeline. Items are dispatched in input order; cancellation is
/// checked before each dispatch and never interrupts work already running.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    width: usize,
}

impl WorkerPool {
    /// Creates a pool; a width of zero is treated as one.
    #[must_use]
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
        }
    }

    /// Maximum concurrent items.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Runs `work` over every item and returns outcomes in input order.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, token: &CancellationToken, work: F) -> Vec<UnitOutcome<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut outcomes: Vec<UnitOutcome<T>> = (0..total).map(|_| UnitOutcome::NotDispatched).collect();
        let mut handles = Vec::with_capacity(total);

        for (position, item) in items.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if token.is_cancelled() {
                debug!(
                    pool = %self.name,
                    dispatched = position,
                    total,
                    "Cancellation observed, skipping remaining items"
                );
                break;
            }

            let future = work(item);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                future.await
            });
            handles.push((position, handle));
        }

        let (positions, handles): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
        for (position, joined) in positions.into_iter().zip(join_all(handles).await) {
            outcomes[position] = match joined {
                Ok(value) => UnitOutcome::Completed(value),
                Err(e) => {
                    error!(pool = %self.name, position, error = %e, "Worker task failed");
                    UnitOutcome::Panicked(e.to_string())
                }
            };
        }
        outcomes
    }
}
