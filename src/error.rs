//! Error types for the cache and dispatch layers
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by cache backends and the cache registry.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No cache is registered under this name
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// A cache is already registered under this name
    #[error("Cache already registered: {0}")]
    AlreadyRegistered(String),

    /// Filesystem failure in the file backend
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// == Dispatch Error Enum ==
/// Errors raised by the background dispatch loop and its handles.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The loop thread or its runtime could not be created
    #[error("Dispatcher failed to start: {0}")]
    Startup(#[from] std::io::Error),

    /// The scheduled work panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The work was cancelled or dropped before producing a result
    #[error("Task was cancelled")]
    Cancelled,

    /// `start` was called on a task that is no longer in the created state
    #[error("Task already started")]
    AlreadyStarted,

    /// A blocking wait was attempted from the dispatch thread itself
    #[error("Cannot block on the dispatch thread")]
    Reentrant,
}

// == Task Failure ==
/// Per-task failure reported by `wait_for_with_timeout`.
#[derive(Error, Debug)]
pub enum TaskFailure<E> {
    /// The task completed with an error
    #[error("{0}")]
    Failed(E),

    /// The task did not finish within its timeout
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E> TaskFailure<E> {
    /// Returns true if this failure is a timeout rather than a task error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskFailure::TimedOut(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
