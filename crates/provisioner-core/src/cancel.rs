//! Cancellation handle shared by a job's pipeline steps.
//!
//! `spec.md` §4.7/§5 describes cancellation and a wall-clock deadline as two
//! sources that "collapse to one observable 'the job was stopped' signal"
//! (per `spec.md` §9's language-neutral re-expression). `CancelToken` is that
//! single signal: a `tokio::sync::Notify`-backed flag with an optional
//! deadline, checked at every suspension point (permit acquisition, network
//! chunks, subprocess execution, filesystem writes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `cancel(job_id)` was called.
    UserRequested,
    /// The per-job wall-clock budget elapsed.
    DeadlineExceeded,
}

struct Inner {
    fired: AtomicBool,
    cause: std::sync::Mutex<Option<CancelCause>>,
    notify: tokio::sync::Notify,
    deadline: Option<Instant>,
}

/// Cloneable cancellation handle. Cloning shares the same underlying flag;
/// the job manager keeps one clone in the in-memory job table and hands
/// another to the worker task.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token with no deadline (fires only on explicit `cancel()`).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                cause: std::sync::Mutex::new(None),
                notify: tokio::sync::Notify::new(),
                deadline: None,
            }),
        }
    }

    /// Create a token that also fires automatically once `budget` elapses
    /// from now (the per-job wall-clock deadline, `spec.md` §4.7).
    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                cause: std::sync::Mutex::new(None),
                notify: tokio::sync::Notify::new(),
                deadline: Some(Instant::now() + budget),
            }),
        }
    }

    /// Explicitly cancel (e.g. from the `DELETE /cancel/{job_id}` handler).
    /// A second call after the token already fired is a no-op.
    pub fn cancel(&self, cause: CancelCause) {
        if !self.inner.fired.swap(true, Ordering::SeqCst) {
            *self.inner.cause.lock().unwrap() = Some(cause);
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.check_deadline();
        self.inner.fired.load(Ordering::SeqCst)
    }

    pub fn cause(&self) -> Option<CancelCause> {
        self.check_deadline();
        *self.inner.cause.lock().unwrap()
    }

    /// Resolves once the token fires (explicit cancel or deadline). A
    /// pipeline step races this against its own work with `tokio::select!`.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if let Some(deadline) = self.inner.deadline {
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.cancel(CancelCause::DeadlineExceeded);
                    }
                }
            } else {
                notified.await;
            }
        }
    }

    fn check_deadline(&self) {
        if let Some(deadline) = self.inner.deadline {
            if !self.inner.fired.load(Ordering::SeqCst) && Instant::now() >= deadline {
                self.cancel(CancelCause::DeadlineExceeded);
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
