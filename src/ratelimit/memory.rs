//! In-process store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::trace;

use super::rate::{Rate, Stat};
use super::store::Store;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};

/// A [`Store`] held in process memory.
///
/// Each operation on a key runs under that key's shard lock, so concurrent
/// `increment` calls never lose updates. State is not shared across processes
/// and never expires.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rates: DashMap<String, Rate>,
    stats: DashMap<String, Stat>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a tracked window.
    pub fn stat_count(&self) -> usize {
        self.stats.len()
    }

    /// Drop all windows, keeping configured rates.
    pub fn clear_stats(&self) {
        self.stats.clear();
    }
}

fn live(ctx: &Context) -> StorageResult<()> {
    match ctx.err() {
        Some(err) => Err(StorageError::Context(err)),
        None => Ok(()),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_rate(&self, ctx: &Context, key: &str) -> StorageResult<Rate> {
        live(ctx)?;
        self.rates
            .get(key)
            .map(|rate| *rate)
            .ok_or(StorageError::NotFound)
    }

    async fn set_rate(&self, ctx: &Context, key: &str, rate: Rate) -> StorageResult<()> {
        live(ctx)?;
        self.rates.insert(key.to_string(), rate);
        Ok(())
    }

    async fn get_stat(&self, ctx: &Context, key: &str) -> StorageResult<Stat> {
        live(ctx)?;
        self.stats
            .get(key)
            .map(|stat| *stat)
            .ok_or(StorageError::NotFound)
    }

    async fn set_stat(&self, ctx: &Context, key: &str, stat: Stat) -> StorageResult<()> {
        live(ctx)?;
        self.stats.insert(key.to_string(), stat);
        Ok(())
    }

    async fn increment(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        live(ctx)?;
        let mut stat = self.stats.get_mut(key).ok_or(StorageError::NotFound)?;
        stat.total_hit = stat.total_hit.saturating_add(1);
        trace!(key = %key, total_hit = stat.total_hit, "Incremented counter");
        Ok(())
    }

    async fn reset(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        live(ctx)?;
        self.stats.insert(key.to_string(), Stat::first_hit(Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let store = InMemoryStore::new();
        let ctx = Context::background();

        assert!(store.get_rate(&ctx, "a").await.unwrap_err().is_not_found());
        assert!(store.get_stat(&ctx, "a").await.unwrap_err().is_not_found());
        assert!(store.increment(&ctx, "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rate_round_trip() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let rate = Rate::new(10, Duration::from_secs(30));

        assert_ok!(store.set_rate(&ctx, "a", rate).await);
        assert_eq!(store.get_rate(&ctx, "a").await.unwrap(), rate);
    }

    #[tokio::test]
    async fn test_increment_and_reset() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let started = Utc::now() - chrono::TimeDelta::minutes(10);

        let stat = Stat {
            total_hit: 4,
            window_started_at: started,
        };
        assert_ok!(store.set_stat(&ctx, "a", stat).await);

        assert_ok!(store.increment(&ctx, "a").await);
        let stat = store.get_stat(&ctx, "a").await.unwrap();
        assert_eq!(stat.total_hit, 5);
        assert_eq!(stat.window_started_at, started);

        assert_ok!(store.reset(&ctx, "a").await);
        let stat = store.get_stat(&ctx, "a").await.unwrap();
        assert_eq!(stat.total_hit, 1);
        assert!(stat.window_started_at > started);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = Context::background();
        assert_ok!(store.reset(&ctx, "hot").await);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let ctx = Context::background();
                store.increment(&ctx, "hot").await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        assert_eq!(store.get_stat(&ctx, "hot").await.unwrap().total_hit, 51);
    }

    #[tokio::test]
    async fn test_fired_context_is_reported() {
        let store = InMemoryStore::new();
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let err = assert_err!(store.set_stat(&ctx, "a", Stat::first_hit(Utc::now())).await);
        assert!(matches!(err, StorageError::Context(_)));
        assert_eq!(store.stat_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_stats_keeps_rates() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        assert_ok!(store.set_rate(&ctx, "a", Rate::per_second(1)).await);
        assert_ok!(store.reset(&ctx, "a").await);
        assert_eq!(store.stat_count(), 1);

        store.clear_stats();

        assert_eq!(store.stat_count(), 0);
        assert_ok!(store.get_rate(&ctx, "a").await);
    }
}
