//! Execution context carried through admission calls.
//!
//! A [`Context`] bundles a caller's cancellation signals, an optional deadline,
//! and the rate limit key for the request. Contexts are cheap to clone and are
//! derived from a parent, inheriting every signal and deadline above them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Reasons a context stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Private slot holding the rate limit key.
#[derive(Debug, Clone)]
struct RateKey(Arc<str>);

/// Cancellation, deadline and request identity for a single call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    key: Option<RateKey>,
    deadline: Option<Instant>,
    signals: Vec<watch::Receiver<bool>>,
}

/// Fires the cancel signal of the context it was created with.
///
/// Dropping the handle without calling [`cancel`](CancelHandle::cancel) leaves
/// the context live.
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

    /// Derive a child context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, CancelHandle { tx })
    }

    /// Derive a child context that expires at `deadline`, or at the parent's
    /// deadline if that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    /// Derive a child context that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check of whether the context has fired.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        let cancelled = wait_cancelled(self.signals.clone());
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => ContextError::Cancelled,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }

    /// Drive `fut` to completion unless the context fires first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

async fn wait_cancelled(signals: Vec<watch::Receiver<bool>>) {
    if signals.is_empty() {
        return future::pending().await;
    }

    let waits = signals.into_iter().map(|mut rx| {
        Box::pin(async move {
            let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                // handle dropped without cancelling
                future::pending::<()>().await;
            }
        })
    });

    future::select_all(waits).await;
}

/// Attach the rate limit key to a derived context.
pub fn with_key(ctx: &Context, key: impl Into<String>) -> Context {
    let mut child = ctx.clone();
    child.key = Some(RateKey(Arc::from(key.into())));
    child
}

/// Read the rate limit key attached with [`with_key`].
pub fn key_from(ctx: &Context) -> Option<&str> {
    ctx.key.as_ref().map(|key| &*key.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_fires() {
        let ctx = Context::background();

        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_fires_done() {
        let (ctx, handle) = Context::background().with_cancel();
        assert!(ctx.err().is_none());

        handle.cancel();

        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn test_child_inherits_parent_cancellation() {
        let (parent, handle) = Context::background().with_cancel();
        let (child, _child_handle) = parent.with_cancel();
        let grandchild = with_key(&child.with_timeout(Duration::from_secs(60)), "a");

        handle.cancel();

        assert_eq!(grandchild.err(), Some(ContextError::Cancelled));
        assert_eq!(grandchild.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = Context::background().with_cancel();
        drop(handle);

        assert!(ctx.err().is_none());
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_timeout_fires_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));

        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_adds_no_deadline() {
        let ctx = Context::background().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.err().is_none());

        let parent = Context::background().with_timeout(Duration::from_secs(5));
        let child = parent.with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let out = ctx.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn test_run_stops_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                42
            })
            .await;
        assert_eq!(out, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_skips_future_when_already_cancelled() {
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let polled = std::sync::atomic::AtomicBool::new(false);
        let out = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await;

        assert_eq!(out, Err(ContextError::Cancelled));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_key_accessors() {
        let ctx = Context::background();
        assert_eq!(key_from(&ctx), None);

        let keyed = with_key(&ctx, "client-42");
        assert_eq!(key_from(&keyed), Some("client-42"));
        // parent is untouched
        assert_eq!(key_from(&ctx), None);

        let rekeyed = with_key(&keyed, "client-43");
        assert_eq!(key_from(&rekeyed), Some("client-43"));
    }
}
