//! Dispatch Module
//!
//! Runs async work on one background event loop so synchronous callers
//! (UI handlers, scripts) can use it without owning a runtime.
//!
//! - `Dispatcher`: the loop thread and its bounded blocking pool
//! - `TaskHandle`: result of one scheduled unit of work
//! - `AsyncTask`: fire-and-forget work with callbacks
//! - `BoundedTaskQueue`: FIFO queue drained by a fixed worker count
//! - `gather_with_concurrency` / `gather_settled_with_concurrency` /
//!   `wait_for_with_timeout`: group combinators

mod gather;
mod handle;
mod queue;
mod runtime;
mod task;

pub use gather::{gather_settled_with_concurrency, gather_with_concurrency, timed, wait_for_with_timeout};
pub use handle::TaskHandle;
pub use queue::BoundedTaskQueue;
pub use runtime::{run_async, run_blocking, Dispatcher};
pub use task::{AsyncTask, TaskState};
