//! Cancellation and deadlines for thing operations.
//!
//! Every `Thing` operation takes a `Context`. When the context is
//! cancelled or its deadline passes, the in-flight future is dropped and
//! the operation returns [`ThingError::Cancelled`] or
//! [`ThingError::TimedOut`].

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ThingError, ThingResult};

/// Cancellation signal and optional deadline carried by an operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every `Context` cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: None,
            deadline: Some(deadline),
        }
    }

    /// A cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run `fut` unless the context is cancelled or expires first.
    ///
    /// A cancelled future is dropped, so callers commit state only after
    /// this returns `Ok`.
    pub async fn run<F, T>(&self, fut: F) -> ThingResult<T>
    where
        F: Future<Output = ThingResult<T>>,
    {
        if self.is_cancelled() {
            return Err(ThingError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(ThingError::TimedOut);
        }

        tokio::select! {
            biased;
            () = cancelled(self.cancel.clone()) => Err(ThingError::Cancelled),
            () = expired(self.deadline) => Err(ThingError::TimedOut),
            result = fut => result,
        }
    }
}

async fn cancelled(rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = rx {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    // Handle dropped without cancelling: never fires.
    std::future::pending::<()>().await
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
