//! Cancellation-aware invoker.
//!
//! [`Throttle`] extracts the rate limit key from a [`Context`] and runs the
//! admission check on a background task, returning as soon as either the
//! check completes or the context fires.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::context::{key_from, Context};
use crate::error::{Result, ThrottleError};
use crate::ratelimit::Allower;

/// Guard placed in front of a protected resource.
#[derive(Clone)]
pub struct Throttle {
    allower: Arc<dyn Allower>,
}

impl Throttle {
    /// Create a new throttle over the given allower.
    pub fn new<A: Allower + 'static>(allower: A) -> Self {
        Self::from_arc(Arc::new(allower))
    }

    /// Create a new throttle sharing an existing allower.
    pub fn from_arc(allower: Arc<dyn Allower>) -> Self {
        Self { allower }
    }

    /// Check whether the request carried by `ctx` may proceed.
    ///
    /// Fails with [`ThrottleError::MissingKey`] before touching storage if the
    /// context has no key. If the context fires first its error is returned
    /// and the in-flight check is left to finish on its own; its result is
    /// dropped.
    #[instrument(skip(self, ctx), fields(key = key_from(ctx).unwrap_or_default()))]
    pub async fn handle(&self, ctx: &Context) -> Result<()> {
        let key = key_from(ctx).ok_or(ThrottleError::MissingKey)?.to_string();

        if let Some(err) = ctx.err() {
            debug!(error = %err, "Context already done");
            return Err(err.into());
        }

        // oneshot send never blocks, so an abandoned task still terminates
        let (tx, rx) = oneshot::channel();
        let allower = Arc::clone(&self.allower);
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            let result = allower.allow(&task_ctx, &key).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(error = %err, "Context done before decision");
                Err(err.into())
            }
            result = rx => result.unwrap_or(Err(ThrottleError::DecisionAborted)),
        }
    }
}
