//! Task Handle Module
//!
//! Result handle returned for work scheduled on the dispatch loop.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::AbortHandle;

use crate::error::DispatchError;

// == Task Handle ==
/// Receives the outcome of one scheduled unit of work, exactly once.
///
/// Await it from async code, `wait()` from a plain thread, or poll it with
/// `try_take()`. If the work is cancelled or dropped before finishing, the
/// handle resolves to `DispatchError::Cancelled`.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<Result<T, DispatchError>>,
    abort: Option<AbortHandle>,
    loop_thread: ThreadId,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<T, DispatchError>>,
        abort: Option<AbortHandle>,
        loop_thread: ThreadId,
    ) -> Self {
        Self {
            receiver,
            abort,
            loop_thread,
        }
    }

    // == Wait ==
    /// Blocks the calling thread until the outcome arrives.
    ///
    /// Fails with `Reentrant` on the loop thread, where waiting would stop
    /// the very loop that has to produce the result.
    pub fn wait(self) -> Result<T, DispatchError> {
        if thread::current().id() == self.loop_thread {
            return Err(DispatchError::Reentrant);
        }
        futures::executor::block_on(self)
    }

    /// Returns the outcome if it is ready, without blocking.
    ///
    /// After it has returned `Some`, the handle is spent.
    pub fn try_take(&mut self) -> Option<Result<T, DispatchError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(DispatchError::Cancelled)),
        }
    }

    /// Requests cancellation. Takes effect at the work's next `.await`.
    ///
    /// Returns false for work that cannot be cancelled, such as blocking
    /// closures and queued operations.
    pub fn cancel(&self) -> bool {
        match &self.abort {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(DispatchError::Cancelled)))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancellable", &self.abort.is_some())
            .finish()
    }
}
