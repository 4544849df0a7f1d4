//! Scripted completion function for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::fixtures::{chapter_text, outline_json, settings_json};
use crate::completion::{CompletionFn, CompletionRequest};
use crate::core::StageKind;
use crate::errors::CallError;

type Script = dyn Fn(&CompletionRequest) -> Result<String, CallError> + Send + Sync;

/// A completion function driven by a closure.
///
/// Records every request and tracks how many calls were in flight at once.
pub struct ScriptedCompletion {
    script: Box<Script>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl std::fmt::Debug for ScriptedCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCompletion")
            .field("latency", &self.latency)
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedCompletion {
    /// Creates a completion that answers with `script`.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, CallError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Answers every stage of a well-behaved run with `chapters` chapters.
    #[must_use]
    pub fn novel(chapters: usize) -> Self {
        Self::new(move |request| Ok(novel_response(request, chapters)))
    }

    /// Sleeps for `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls made for `stage`.
    #[must_use]
    pub fn calls_for(&self, stage: StageKind) -> usize {
        self.requests.lock().iter().filter(|r| r.stage == stage).count()
    }
}

/// The answer a well-behaved model gives for `request`.
#[must_use]
pub fn novel_response(request: &CompletionRequest, chapters: usize) -> String {
    match request.stage {
        StageKind::Settings => settings_json("The Anchor's Return"),
        StageKind::Outline => outline_json(chapters),
        StageKind::Chapter | StageKind::Assembly => chapter_text(request.unit.unwrap_or(0)),
    }
}

#[async_trait]
impl CompletionFn for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.script)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tracks_concurrency() {
        let completion = Arc::new(ScriptedCompletion::always("ok").with_latency(Duration::from_millis(20)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let completion = completion.clone();
            handles.push(tokio::spawn(async move {
                completion
                    .complete(&CompletionRequest::new(StageKind::Chapter, "p"))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "ok");
        }

        assert_eq!(completion.call_count(), 4);
        assert!(completion.max_in_flight() >= 2);
        assert_eq!(completion.calls_for(StageKind::Chapter), 4);
    }

    #[tokio::test]
    async fn test_novel_script_answers_each_stage() {
        let completion = ScriptedCompletion::novel(3);
        let outline = completion
            .complete(&CompletionRequest::new(StageKind::Outline, "p"))
            .await
            .unwrap();
        assert!(outline.contains("\"index\": 3"));
    }
}
