//! Bounded Task Queue Module
//!
//! FIFO queue of async operations drained by a fixed number of workers on
//! the dispatch loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::runtime::panic_message;
use crate::dispatch::{Dispatcher, TaskHandle};
use crate::error::DispatchError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// An operation tagged with the queue generation it was submitted in
struct QueuedJob {
    epoch: u64,
    run: Job,
}

type JobReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedJob>>>;

// == Bounded Task Queue ==
/// Runs queued operations with at most `max_workers` in flight.
///
/// Operations start in submission order. `stop` abandons the in-flight
/// operations and discards everything still queued; their handles resolve to
/// `Cancelled`.
#[derive(Debug)]
pub struct BoundedTaskQueue {
    dispatcher: Dispatcher,
    max_workers: usize,
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: JobReceiver,
    epoch: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    workers: Mutex<Vec<AbortHandle>>,
}

impl BoundedTaskQueue {
    // == Constructor ==
    /// Creates a stopped queue. A `max_workers` of 0 is treated as 1.
    pub fn new(dispatcher: Dispatcher, max_workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            max_workers: max_workers.max(1),
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            epoch: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(dispatcher: Dispatcher, config: &Config) -> Self {
        Self::new(dispatcher, config.queue_workers)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Operations submitted but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    // == Enqueue ==
    /// Submits an operation and returns a handle to its result.
    ///
    /// Never blocks. The operation is not started until a worker is free, so
    /// it is passed as a closure producing the future.
    pub fn enqueue<F, Fut>(&self, operation: F) -> TaskHandle<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run: Job = Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(async move { operation().await })
                    .catch_unwind()
                    .await
                    .map_err(|panic| DispatchError::Panicked(panic_message(&*panic)));
                let _ = tx.send(outcome);
            }
            .boxed()
        });

        let job = QueuedJob {
            epoch: self.epoch.load(Ordering::SeqCst),
            run,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            // Unreachable while the queue owns its receiver
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Task queue closed, operation dropped");
        }
        TaskHandle::new(rx, None, self.dispatcher.loop_thread())
    }

    // == Start ==
    /// Launches exactly `max_workers` workers. No-op while running.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            debug!("Task queue already running");
            return;
        }

        for worker in 0..self.max_workers {
            let join = self.dispatcher.handle().spawn(worker_loop(
                worker,
                Arc::clone(&self.receiver),
                Arc::clone(&self.epoch),
                Arc::clone(&self.pending),
            ));
            workers.push(join.abort_handle());
        }
        info!(workers = self.max_workers, "Task queue started");
    }

    // == Stop ==
    /// Aborts all workers and discards queued operations.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        for worker in workers.drain(..) {
            worker.abort();
        }
        info!(pending = self.pending(), "Task queue stopped");
    }
}

impl Drop for BoundedTaskQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

// == Worker Loop ==
/// Pulls operations one at a time until aborted.
///
/// Operations from an earlier epoch were queued before a `stop` and are
/// dropped unrun, which resolves their handles to `Cancelled`.
async fn worker_loop(worker: usize, receiver: JobReceiver, epoch: Arc<AtomicU64>, pending: Arc<AtomicUsize>) {
    debug!(worker, "Queue worker started");
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = next else {
            break;
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        if job.epoch < epoch.load(Ordering::SeqCst) {
            debug!(worker, "Discarding operation queued before stop");
            continue;
        }
        (job.run)().await;
    }
    debug!(worker, "Queue worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Tracks how many operations run at once and the highest count seen
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_worker_count_bounds_concurrency() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 3);
        let gauge = Arc::new(Gauge::default());

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let gauge = Arc::clone(&gauge);
                queue.enqueue(move || async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    gauge.exit();
                    i
                })
            })
            .collect();
        assert_eq!(queue.pending(), 12);

        queue.start();
        let results: Vec<i32> = handles.into_iter().map(|h| h.wait().unwrap()).collect();

        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_single_worker_runs_in_order() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        queue.start();

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue.enqueue(move || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 0);

        assert_eq!(queue.max_workers(), 1);
        queue.start();
        assert_eq!(queue.enqueue(|| async { 9 }).wait().unwrap(), 9);
    }

    #[test]
    fn test_start_is_idempotent() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 2);

        assert!(!queue.is_running());
        queue.start();
        queue.start();

        assert!(queue.is_running());
        assert_eq!(queue.workers.lock().len(), 2);
    }

    #[test]
    fn test_stop_discards_queued_operations() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 1);
        let ran = Arc::new(AtomicUsize::new(0));
        queue.start();

        let blocker = queue.enqueue(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let queued: Vec<_> = (0..3)
            .map(|_| {
                let ran = Arc::clone(&ran);
                queue.enqueue(move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert!(!queue.is_running());
        assert!(matches!(blocker.wait(), Err(DispatchError::Cancelled)));

        // Restarting drains the stale operations without running them
        queue.start();
        for handle in queued {
            assert!(matches!(handle.wait(), Err(DispatchError::Cancelled)));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        assert_eq!(queue.enqueue(|| async { "fresh" }).wait().unwrap(), "fresh");
    }

    #[test]
    fn test_panicking_operation_does_not_kill_worker() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let queue = BoundedTaskQueue::new(dispatcher, 1);
        queue.start();

        let bad = queue.enqueue(|| async {
            if true {
                panic!("bad export");
            }
        });
        let good = queue.enqueue(|| async { 1 });

        assert!(matches!(bad.wait(), Err(DispatchError::Panicked(_))));
        assert_eq!(good.wait().unwrap(), 1);
    }
}
