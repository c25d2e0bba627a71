//! Dispatch Loop Module
//!
//! One background event loop on a dedicated OS thread, plus a bounded pool
//! for blocking calls.
//!
//! The loop is a tokio current-thread runtime driven by the `nova-dispatch`
//! thread. Futures scheduled from any thread run cooperatively on it and
//! interleave only at `.await` points.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use futures::FutureExt;
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::TaskHandle;
use crate::error::DispatchError;

static SHARED: OnceCell<Dispatcher> = OnceCell::new();

// == Dispatcher ==
/// Cheaply clonable handle to a background event loop.
///
/// The loop thread exits once every clone is dropped. The shared instance is
/// never dropped and lives for the rest of the process.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Debug)]
struct DispatcherInner {
    handle: Handle,
    loop_thread: ThreadId,
    blocking_threads: usize,
    /// Dropping this sender releases the loop thread
    _shutdown: oneshot::Sender<()>,
}

impl Dispatcher {
    // == Constructor ==
    /// Starts a loop thread whose blocking pool holds at most
    /// `blocking_threads` threads.
    pub fn new(blocking_threads: usize) -> Result<Self, DispatchError> {
        let blocking_threads = blocking_threads.max(1);
        let runtime = Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(blocking_threads)
            .thread_name("nova-blocking")
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("nova-dispatch".to_string())
            .spawn(move || {
                // Resolves with an error once the last Dispatcher is dropped
                let _ = runtime.block_on(shutdown_rx);
                debug!("Dispatch loop stopped");
            })?;

        info!(blocking_threads, "Dispatch loop started");
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                handle,
                loop_thread: thread.thread().id(),
                blocking_threads,
                _shutdown: shutdown_tx,
            }),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, DispatchError> {
        Self::new(config.blocking_pool_size)
    }

    // == Shared Instance ==
    /// Returns the process-wide loop, starting it from the environment on
    /// first use.
    pub fn shared() -> Result<Self, DispatchError> {
        SHARED
            .get_or_try_init(|| Self::from_config(&Config::from_env()))
            .cloned()
    }

    /// Starts the process-wide loop from `config`.
    ///
    /// Calling it again is a no-op that returns the running loop.
    pub fn init_shared(config: &Config) -> Result<Self, DispatchError> {
        SHARED.get_or_try_init(|| Self::from_config(config)).cloned()
    }

    /// True once the process-wide loop has been started.
    pub fn is_shared_initialized() -> bool {
        SHARED.get().is_some()
    }

    pub fn blocking_threads(&self) -> usize {
        self.inner.blocking_threads
    }

    /// True when called from the loop thread itself.
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.inner.loop_thread
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub(crate) fn loop_thread(&self) -> ThreadId {
        self.inner.loop_thread
    }

    // == Spawn ==
    /// Schedules `future` on the loop and returns immediately.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let join = self.inner.handle.spawn(async move {
            let outcome = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .map_err(|panic| DispatchError::Panicked(panic_message(&*panic)));
            let _ = tx.send(outcome);
        });
        TaskHandle::new(rx, Some(join.abort_handle()), self.inner.loop_thread)
    }

    // == Spawn Blocking ==
    /// Runs a blocking closure on the bounded pool, keeping the loop free.
    ///
    /// Once started the closure cannot be cancelled.
    pub fn spawn_blocking<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.handle.spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|panic| DispatchError::Panicked(panic_message(&*panic)));
            let _ = tx.send(outcome);
        });
        TaskHandle::new(rx, None, self.inner.loop_thread)
    }

    // == Block On ==
    /// Runs `future` on the loop and blocks the calling thread until it
    /// finishes.
    ///
    /// The caller is stalled for the whole run, so reserve this for short
    /// work. Fails with `Reentrant` when called from the loop thread.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, DispatchError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_dispatch_thread() {
            return Err(DispatchError::Reentrant);
        }
        self.spawn(future).wait()
    }
}

// == Free Functions ==
/// Runs `future` on the shared loop and waits for its output.
pub fn run_async<F>(future: F) -> Result<F::Output, DispatchError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Dispatcher::shared()?.block_on(future)
}

/// Runs a blocking closure on the blocking pool of the current runtime.
///
/// Use inside futures running on the loop so synchronous work such as
/// database calls does not stall it.
pub async fn run_blocking<F, T>(f: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        if e.is_panic() {
            DispatchError::Panicked(panic_message(&*e.into_panic()))
        } else {
            DispatchError::Cancelled
        }
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_block_on_returns_output() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let value = dispatcher.block_on(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            21 * 2
        });

        assert_eq!(assert_ok!(value), 42);
    }

    #[test]
    fn test_block_on_propagates_task_error() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let value = dispatcher
            .block_on(async { Err::<u32, String>("query failed".to_string()) })
            .unwrap();

        assert_eq!(value, Err("query failed".to_string()));
    }

    #[test]
    fn test_panic_becomes_error() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let result = dispatcher.block_on(async {
            if true {
                panic!("export crashed");
            }
        });

        assert!(matches!(result, Err(DispatchError::Panicked(msg)) if msg == "export crashed"));
    }

    #[test]
    fn test_work_runs_on_loop_thread() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let probe = dispatcher.clone();

        let on_loop = dispatcher.block_on(async move { probe.is_dispatch_thread() }).unwrap();

        assert!(on_loop);
        assert!(!dispatcher.is_dispatch_thread());
    }

    #[test]
    fn test_block_on_from_loop_thread_is_rejected() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let inner = dispatcher.clone();

        let nested = dispatcher
            .block_on(async move { inner.block_on(async { 1 }) })
            .unwrap();

        assert_err!(nested);
    }

    #[test]
    fn test_spawn_blocking_uses_pool_thread() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let name = dispatcher
            .spawn_blocking(|| thread::current().name().map(str::to_string))
            .wait()
            .unwrap();

        assert_eq!(name.as_deref(), Some("nova-blocking"));
    }

    #[test]
    fn test_run_blocking_inside_future() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let total = dispatcher
            .block_on(async { run_blocking(|| (1..=10).sum::<u32>()).await })
            .unwrap();

        assert_eq!(assert_ok!(total), 55);
    }

    #[test]
    fn test_shared_is_idempotent() {
        let first = Dispatcher::init_shared(&Config::default()).unwrap();
        let second = Dispatcher::shared().unwrap();

        assert!(Dispatcher::is_shared_initialized());
        assert_eq!(first.loop_thread(), second.loop_thread());
        assert_eq!(run_async(async { "ok" }).unwrap(), "ok");
    }
}
