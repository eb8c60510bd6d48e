//! Key-value backed store.
//!
//! Rates and stats are persisted as JSON records under derived keys
//! (`"{prefix}_{key}"`) with a finite time-to-live, so entries for idle keys
//! evict themselves. The [`KvClient`] trait is the seam for a networked
//! key-value store; [`MemoryKv`] is an in-process client with the same
//! expiry semantics.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use super::rate::{Rate, Stat};
use super::store::Store;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};

/// Default prefix of stat records.
pub const STAT_PREFIX: &str = "throttle_stat";
/// Default prefix of rate records.
pub const RATE_PREFIX: &str = "throttle_rate";
/// Default time-to-live of stat records.
pub const STAT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default time-to-live of rate records.
pub const RATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Minimal string key-value client.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Read the value stored under `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()>;
}

/// Record layout of a [`KvStore`].
#[derive(Debug, Clone)]
pub struct KvLayout {
    pub stat_prefix: String,
    pub rate_prefix: String,
    pub stat_ttl: Duration,
    pub rate_ttl: Duration,
}

impl Default for KvLayout {
    fn default() -> Self {
        Self {
            stat_prefix: STAT_PREFIX.to_string(),
            rate_prefix: RATE_PREFIX.to_string(),
            stat_ttl: STAT_TTL,
            rate_ttl: RATE_TTL,
        }
    }
}

/// A [`Store`] on top of a [`KvClient`].
///
/// `increment` is a fetch-mutate-write sequence and is NOT atomic: concurrent
/// callers on the same key can lose updates and let a window overshoot its
/// ceiling. Use a backend with an atomic counter primitive where the ceiling
/// must be strict.
pub struct KvStore<C> {
    client: C,
    layout: KvLayout,
}

impl<C: KvClient> KvStore<C> {
    /// Create a store with the default key layout.
    pub fn new(client: C) -> Self {
        Self::with_layout(client, KvLayout::default())
    }

    pub fn with_layout(client: C, layout: KvLayout) -> Self {
        Self { client, layout }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn stat_key(&self, key: &str) -> String {
        format!("{}_{}", self.layout.stat_prefix, key)
    }

    fn rate_key(&self, key: &str) -> String {
        format!("{}_{}", self.layout.rate_prefix, key)
    }

    async fn read<T: DeserializeOwned>(&self, ctx: &Context, record: &str) -> StorageResult<T> {
        let encoded = ctx.run(self.client.get(record)).await??;
        match encoded {
            Some(encoded) if !encoded.is_empty() => Ok(serde_json::from_str(&encoded)?),
            _ => Err(StorageError::NotFound),
        }
    }

    async fn write<T: Serialize + Sync>(
        &self,
        ctx: &Context,
        record: &str,
        value: &T,
        ttl: Duration,
    ) -> StorageResult<()> {
        let encoded = serde_json::to_string(value)?;
        ctx.run(self.client.set(record, encoded, ttl)).await?
    }
}

#[async_trait]
impl<C: KvClient> Store for KvStore<C> {
    async fn get_rate(&self, ctx: &Context, key: &str) -> StorageResult<Rate> {
        self.read(ctx, &self.rate_key(key)).await
    }

    async fn set_rate(&self, ctx: &Context, key: &str, rate: Rate) -> StorageResult<()> {
        self.write(ctx, &self.rate_key(key), &rate, self.layout.rate_ttl)
            .await
    }

    async fn get_stat(&self, ctx: &Context, key: &str) -> StorageResult<Stat> {
        self.read(ctx, &self.stat_key(key)).await
    }

    async fn set_stat(&self, ctx: &Context, key: &str, stat: Stat) -> StorageResult<()> {
        self.write(ctx, &self.stat_key(key), &stat, self.layout.stat_ttl)
            .await
    }

    async fn increment(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let mut stat = self.get_stat(ctx, key).await?;
        stat.total_hit = stat.total_hit.saturating_add(1);
        trace!(key = %key, total_hit = stat.total_hit, "Writing incremented stat");
        self.set_stat(ctx, key, stat).await
    }

    async fn reset(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.set_stat(ctx, key, Stat::first_hit(Utc::now())).await
    }
}

/// In-process [`KvClient`] with per-entry expiry.
///
/// Expired entries are dropped lazily on read. A TTL too large to represent
/// as an instant never expires.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, expires_at)) if expires_at.map_or(true, |at| Instant::now() < at) => {
                return Ok(Some(value.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries.lock().insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}
