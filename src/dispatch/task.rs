//! Background Task Module
//!
//! Fire-and-forget work on the dispatch loop with success and error
//! callbacks.
//!
//! Callbacks run on the loop thread. Code that needs to update a UI must hand
//! the value over to its own thread.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use tokio::task::AbortHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, warn};

use crate::dispatch::runtime::panic_message;
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;

type SuccessCallback<T> = Box<dyn FnOnce(T) + Send>;
type ErrorCallback = Box<dyn FnOnce(anyhow::Error) + Send>;

// == Task State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// True for states a task never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

/// State shared between the task owner and the running wrapper
#[derive(Debug)]
struct Status {
    state: Mutex<TaskState>,
    changed: Condvar,
}

impl Status {
    /// Records the final state unless the task was cancelled first.
    fn finish(&self, outcome: TaskState) -> bool {
        let mut state = self.state.lock();
        if *state == TaskState::Cancelled {
            return false;
        }
        *state = outcome;
        self.changed.notify_all();
        true
    }
}

// == Async Task ==
/// A future that runs in the background and reports through callbacks.
///
/// Exactly one of `on_success` or `on_error` is called once the future
/// finishes, and neither is called after `cancel`. A failure with no error
/// callback is logged.
pub struct AsyncTask<T> {
    name: String,
    future: Option<BoxFuture<'static, anyhow::Result<T>>>,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback>,
    status: Arc<Status>,
    abort: Option<AbortHandle>,
    loop_thread: Option<ThreadId>,
}

impl<T: Send + 'static> AsyncTask<T> {
    // == Constructor ==
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: "background".to_string(),
            future: Some(future.boxed()),
            on_success: None,
            on_error: None,
            status: Arc::new(Status {
                state: Mutex::new(TaskState::Created),
                changed: Condvar::new(),
            }),
            abort: None,
            loop_thread: None,
        }
    }

    /// Name used in log lines.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_success<C>(mut self, callback: C) -> Self
    where
        C: FnOnce(T) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error<C>(mut self, callback: C) -> Self
    where
        C: FnOnce(anyhow::Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    // == Start ==
    /// Schedules the task on the shared dispatch loop.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        let dispatcher = Dispatcher::shared()?;
        self.start_on(&dispatcher)
    }

    /// Schedules the task on `dispatcher` and returns immediately.
    ///
    /// The task logs through the subscriber that is current for the caller.
    ///
    /// A task starts at most once. Starting a cancelled task fails with
    /// `Cancelled`, any other repeat with `AlreadyStarted`.
    pub fn start_on(&mut self, dispatcher: &Dispatcher) -> Result<(), DispatchError> {
        let mut state = self.status.state.lock();
        match *state {
            TaskState::Created => {}
            TaskState::Cancelled => return Err(DispatchError::Cancelled),
            _ => return Err(DispatchError::AlreadyStarted),
        }
        let future = self.future.take().ok_or(DispatchError::AlreadyStarted)?;
        *state = TaskState::Running;
        self.status.changed.notify_all();
        drop(state);

        let status = Arc::clone(&self.status);
        let on_success = self.on_success.take();
        let on_error = self.on_error.take();
        let name = self.name.clone();

        let wrapper = async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(anyhow!("task panicked: {}", panic_message(&*panic))),
            };

            let outcome = if result.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            if !status.finish(outcome) {
                debug!(task = %name, "Result discarded after cancel");
                return;
            }

            match result {
                Ok(value) => {
                    debug!(task = %name, "Background task completed");
                    if let Some(callback) = on_success {
                        callback(value);
                    }
                }
                Err(error) => match on_error {
                    Some(callback) => callback(error),
                    None => warn!(task = %name, error = %error, "Background task failed with no error handler"),
                },
            }
        };
        let join = dispatcher.handle().spawn(wrapper.with_current_subscriber());

        self.abort = Some(join.abort_handle());
        self.loop_thread = Some(dispatcher.loop_thread());
        debug!(task = %self.name, "Background task started");
        Ok(())
    }
}

impl<T> AsyncTask<T> {
    // == Cancel ==
    /// Cancels a task that has not finished yet.
    ///
    /// Returns false, and changes nothing, once the task has completed or
    /// failed.
    pub fn cancel(&self) -> bool {
        let mut state = self.status.state.lock();
        match *state {
            TaskState::Created | TaskState::Running => {
                *state = TaskState::Cancelled;
                self.status.changed.notify_all();
                if let Some(abort) = &self.abort {
                    abort.abort();
                }
                debug!(task = %self.name, "Background task cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> TaskState {
        *self.status.state.lock()
    }

    /// Blocks until the task reaches a terminal state or `timeout` passes,
    /// then returns the state.
    ///
    /// On the loop thread it returns the current state without waiting.
    pub fn wait(&self, timeout: Duration) -> TaskState {
        let mut state = self.status.state.lock();
        if self.loop_thread == Some(thread::current().id()) {
            return *state;
        }
        let deadline = Instant::now() + timeout;
        while !state.is_terminal() {
            if self.status.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }
}

impl<T> fmt::Debug for AsyncTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
