//! Admission trait for abstracting decision sources.

use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// Trait for anything that can admit or reject a hit for a key.
///
/// The [`Throttle`](crate::Throttle) invoker works with any implementation;
/// [`RateLimiter`](super::RateLimiter) is the storage-backed one.
#[async_trait]
pub trait Allower: Send + Sync {
    /// Returns `Ok(())` if the hit for `key` is admitted.
    ///
    /// A rejected hit is reported as
    /// [`ThrottleError::LimitExceeded`](crate::ThrottleError::LimitExceeded).
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()>;
}

/// Adapter turning a closure into an [`Allower`].
pub struct AllowFn<F>(pub F);

#[async_trait]
impl<F, Fut> Allower for AllowFn<F>
where
    F: Fn(Context, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        (self.0)(ctx.clone(), key.to_string()).await
    }
}
