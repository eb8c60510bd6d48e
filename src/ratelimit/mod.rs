//! Fixed-window rate limiting over pluggable storage.

mod allower;
mod kv;
mod limiter;
mod memory;
mod rate;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use allower::{AllowFn, Allower};
pub use kv::{KvClient, KvLayout, KvStore, MemoryKv, RATE_PREFIX, RATE_TTL, STAT_PREFIX, STAT_TTL};
pub use limiter::{Decision, RateLimiter, SEED_TIMEOUT};
pub use memory::InMemoryStore;
pub use rate::{Rate, Stat, DEFAULT_KEY};
pub use store::Store;
