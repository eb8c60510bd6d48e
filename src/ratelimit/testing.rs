//! Instrumented store for unit tests.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::memory::InMemoryStore;
use super::rate::{Rate, Stat};
use super::store::Store;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};

/// Wraps an [`InMemoryStore`], recording every call and failing the
/// operations it is told to.
#[derive(Default)]
pub(crate) struct RecordingStore {
    inner: InMemoryStore,
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub(crate) fn fail_on(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub(crate) fn heal(&self) {
        self.failing.lock().clear();
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|call| **call == op).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, op: &'static str) -> StorageResult<()> {
        self.calls.lock().push(op);
        if self.failing.lock().contains(op) {
            return Err(StorageError::Backend(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn get_rate(&self, ctx: &Context, key: &str) -> StorageResult<Rate> {
        self.record("get_rate")?;
        self.inner.get_rate(ctx, key).await
    }

    async fn set_rate(&self, ctx: &Context, key: &str, rate: Rate) -> StorageResult<()> {
        self.record("set_rate")?;
        self.inner.set_rate(ctx, key, rate).await
    }

    async fn get_stat(&self, ctx: &Context, key: &str) -> StorageResult<Stat> {
        self.record("get_stat")?;
        self.inner.get_stat(ctx, key).await
    }

    async fn set_stat(&self, ctx: &Context, key: &str, stat: Stat) -> StorageResult<()> {
        self.record("set_stat")?;
        self.inner.set_stat(ctx, key, stat).await
    }

    async fn increment(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.record("increment")?;
        self.inner.increment(ctx, key).await
    }

    async fn reset(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.record("reset")?;
        self.inner.reset(ctx, key).await
    }
}
