//! Throttle - Fixed-Window Admission Control
//!
//! This crate decides whether an operation identified by a key may proceed
//! under a configured rate, and records admitted hits in a store that can be
//! shared by every instance of a service. The [`Throttle`] invoker bounds each
//! check by the caller's [`Context`](context::Context).

pub mod config;
pub mod context;
pub mod error;
pub mod ratelimit;
mod throttle;

pub use context::{key_from, with_key, Context};
pub use error::{Result, StorageError, ThrottleError};
pub use throttle::Throttle;
