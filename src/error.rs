//! Error types for the throttle crate.

use std::fmt;

use thiserror::Error;

use crate::context::ContextError;

/// Main error type for admission decisions.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The execution context carried no rate limit key.
    #[error("throttle: missing key from context")]
    MissingKey,

    /// The key is over its configured rate for the current window.
    #[error("throttle: limit exceeded")]
    LimitExceeded,

    /// The key collides with a reserved storage identifier.
    #[error("throttle: key {0:?} is reserved")]
    ReservedKey(String),

    /// A read or write against the backing store failed.
    #[error("{source}: {step}")]
    Storage {
        /// Which step of the decision failed
        step: Step,
        /// The underlying storage failure
        #[source]
        source: StorageError,
    },

    /// The caller's context fired before the decision completed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The background decision task ended without reporting a result.
    #[error("throttle: decision task aborted")]
    DecisionAborted,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Wrap a storage failure with the step it happened in.
    pub fn storage(step: Step, source: StorageError) -> Self {
        ThrottleError::Storage { step, source }
    }

    /// Returns `true` for the business outcome of a denied request.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, ThrottleError::LimitExceeded)
    }
}

/// The decision step a storage failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FetchStat,
    CreateStat,
    ResetCounter,
    IncrementCounter,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Step::FetchStat => "fetching stat",
            Step::CreateStat => "creating initial stat",
            Step::ResetCounter => "resetting counter",
            Step::IncrementCounter => "incrementing counter",
        };
        f.write_str(step)
    }
}

/// Errors reported by a [`Store`](crate::ratelimit::Store) implementation.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record exists for the key.
    #[error("storage: not found")]
    NotFound,

    /// The call's context fired before the backend answered.
    #[error("storage: {0}")]
    Context(#[from] ContextError),

    /// A stored record could not be encoded or decoded.
    #[error("storage: codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The backend itself failed.
    #[error("storage: backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
