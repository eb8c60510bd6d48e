//! Storage trait for rate configuration and hit counters.

use async_trait::async_trait;

use super::rate::{Rate, Stat};
use crate::context::Context;
use crate::error::StorageResult;

/// Trait for rate and stat storage backends.
///
/// This trait abstracts over the in-process [`InMemoryStore`](super::InMemoryStore)
/// and key-value backed stores such as [`KvStore`](super::KvStore), so the
/// limiter works with either. Every operation receives the caller's context
/// and must not outlive its deadline.
///
/// Linearizability of `increment`, `reset` and `set_stat` for a single key is
/// the backend's responsibility; the limiter does not serialize them.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the rate configured for `key`.
    ///
    /// Returns [`StorageError::NotFound`](crate::error::StorageError::NotFound)
    /// when none is configured.
    async fn get_rate(&self, ctx: &Context, key: &str) -> StorageResult<Rate>;

    /// Persist the rate for `key`.
    async fn set_rate(&self, ctx: &Context, key: &str, rate: Rate) -> StorageResult<()>;

    /// Fetch the current window state for `key`.
    async fn get_stat(&self, ctx: &Context, key: &str) -> StorageResult<Stat>;

    /// Persist the window state for `key`.
    async fn set_stat(&self, ctx: &Context, key: &str, stat: Stat) -> StorageResult<()>;

    /// Add one hit to the current window of `key`.
    async fn increment(&self, ctx: &Context, key: &str) -> StorageResult<()>;

    /// Replace the state of `key` with a fresh window holding one hit.
    async fn reset(&self, ctx: &Context, key: &str) -> StorageResult<()>;
}
