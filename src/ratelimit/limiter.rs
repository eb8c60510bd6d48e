//! Fixed-window rate limiter over a shared store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, trace, warn};

use super::allower::Allower;
use super::rate::{Rate, Stat, DEFAULT_KEY};
use super::store::Store;
use crate::context::Context;
use crate::error::{Result, StorageError, Step, ThrottleError};

/// Upper bound on seeding the default rate at construction.
pub const SEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }
}

/// The fixed-window rate limiter.
///
/// Counts admitted hits per key in windows anchored at the first hit. The
/// hit that opens a window (first observation of a key, or the first hit after
/// the window elapsed) is always admitted without a ceiling check, which
/// grants one extra request at window boundaries.
///
/// The fetch-check-write sequence of [`decide`](RateLimiter::decide) is not
/// serialized here; strictness under concurrent callers on one key depends on
/// the store's atomicity.
pub struct RateLimiter {
    /// Fallback for keys without their own rate
    default_rate: Rate,
    store: Arc<dyn Store>,
}

impl RateLimiter {
    /// Create a rate limiter, seeding `default_rate` into the store if the
    /// store holds none.
    ///
    /// Seeding is best-effort: it is not coordinated with other instances
    /// constructing against the same store, and failures only get logged.
    pub async fn new(default_rate: Rate, store: Arc<dyn Store>) -> Self {
        Self::with_seed_timeout(default_rate, store, SEED_TIMEOUT).await
    }

    /// Like [`new`](RateLimiter::new), bounding seeding by `timeout`.
    pub async fn with_seed_timeout(
        default_rate: Rate,
        store: Arc<dyn Store>,
        timeout: Duration,
    ) -> Self {
        let ctx = Context::background().with_timeout(timeout);

        let stored = match ctx.run(store.get_rate(&ctx, DEFAULT_KEY)).await {
            Ok(stored) => stored,
            Err(err) => Err(StorageError::from(err)),
        };

        let default_rate = match stored {
            Ok(stored) => {
                debug!(
                    max_request = stored.max_request,
                    window = ?stored.window,
                    "Using stored default rate"
                );
                stored
            }
            Err(err) => {
                if !err.is_not_found() {
                    warn!(error = %err, "Failed to fetch default rate");
                }

                let seeded = match ctx.run(store.set_rate(&ctx, DEFAULT_KEY, default_rate)).await {
                    Ok(seeded) => seeded,
                    Err(err) => Err(StorageError::from(err)),
                };
                if let Err(err) = seeded {
                    warn!(error = %err, "Failed to seed default rate");
                }
                default_rate
            }
        };

        Self {
            default_rate,
            store,
        }
    }

    /// The rate applied to keys without their own configuration.
    pub fn default_rate(&self) -> Rate {
        self.default_rate
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Decide whether a hit for `key` is admitted, recording it if so.
    pub async fn decide(&self, ctx: &Context, key: &str) -> Result<Decision> {
        if key == DEFAULT_KEY {
            return Err(ThrottleError::ReservedKey(key.to_string()));
        }

        let now = Utc::now();

        let stat = match self.store.get_stat(ctx, key).await {
            Ok(stat) => stat,
            Err(err) if err.is_not_found() => {
                trace!(key = %key, "First hit, opening window");
                self.store
                    .set_stat(ctx, key, Stat::first_hit(now))
                    .await
                    .map_err(|e| ThrottleError::storage(Step::CreateStat, e))?;
                return Ok(Decision::Allowed);
            }
            Err(err) => return Err(ThrottleError::storage(Step::FetchStat, err)),
        };

        let rate = self.rate_for(ctx, key).await;

        trace!(
            key = %key,
            total_hit = stat.total_hit,
            max_request = rate.max_request,
            "Checking rate limit"
        );

        if stat.window_expired(&rate, now) {
            debug!(key = %key, "Window elapsed, resetting counter");
            self.store
                .reset(ctx, key)
                .await
                .map_err(|e| ThrottleError::storage(Step::ResetCounter, e))?;
            return Ok(Decision::Allowed);
        }

        if stat.would_exceed(&rate) {
            debug!(
                key = %key,
                total_hit = stat.total_hit,
                max_request = rate.max_request,
                "Rate limit exceeded"
            );
            return Ok(Decision::Denied);
        }

        self.store
            .increment(ctx, key)
            .await
            .map_err(|e| ThrottleError::storage(Step::IncrementCounter, e))?;

        Ok(Decision::Allowed)
    }

    /// The rate for `key`, falling back to the default on any lookup failure.
    async fn rate_for(&self, ctx: &Context, key: &str) -> Rate {
        match self.store.get_rate(ctx, key).await {
            Ok(rate) => rate,
            Err(err) => {
                if !err.is_not_found() {
                    trace!(key = %key, error = %err, "Rate lookup failed, using default");
                }
                self.default_rate
            }
        }
    }
}

#[async_trait]
impl Allower for RateLimiter {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        match self.decide(ctx, key).await? {
            Decision::Allowed => Ok(()),
            Decision::Denied => Err(ThrottleError::LimitExceeded),
        }
    }
}
