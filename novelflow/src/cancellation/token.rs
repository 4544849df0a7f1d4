//! Cancellation token for cooperative, hierarchical cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Vec<CancelCallback>>,
}

/// A token for cooperative cancellation.
///
/// Clones share state. Cancellation is idempotent and only the first reason is
/// kept. A [`child`](Self::child) token is cancelled with its parent but can
/// also be cancelled on its own without affecting the parent.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

fn invoke(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever this one is.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let weak_child = Arc::downgrade(&child.inner);
        let weak_parent: Weak<Inner> = Arc::downgrade(&self.inner);
        self.on_cancel(move || {
            let reason = weak_parent
                .upgrade()
                .and_then(|p| p.reason.read().clone())
                .unwrap_or_else(|| "parent cancelled".to_string());
            if let Some(inner) = weak_child.upgrade() {
                Self { inner }.cancel(reason);
            }
        });
        child
    }

    /// Requests cancellation with a reason.
    ///
    /// Callbacks run once, immediately. Panics in callbacks are logged and
    /// suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            // The reason is visible before the flag, so a cancelled token
            // always has one.
            let mut slot = self.inner.reason.write();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.into());
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            invoke(callback);
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        invoke(Box::new(callback));
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
