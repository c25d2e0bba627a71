//! Combinators Module
//!
//! Helpers for running groups of futures: bounded gathering, per-task
//! timeouts, and timing.

use std::future::Future;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TaskFailure;

// == Gather With Concurrency ==
/// Awaits all `tasks` with at most `limit` of them in progress at once.
///
/// Results come back in input order. The first error fails the whole call and
/// the remaining tasks are dropped. A `limit` of 0 is treated as 1.
pub async fn gather_with_concurrency<I, F, T, E>(limit: usize, tasks: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let gate = Semaphore::new(limit.max(1));
    let gated = tasks.into_iter().map(|task| {
        let gate = &gate;
        async move {
            // The gate is never closed, so acquiring cannot fail
            let _permit = gate.acquire().await;
            task.await
        }
    });
    try_join_all(gated).await
}

/// Like [`gather_with_concurrency`] but waits for every task.
///
/// Each slot holds that task's own result, in input order. A failure does not
/// stop the other tasks. A `limit` of 0 is treated as 1.
pub async fn gather_settled_with_concurrency<I, F, T, E>(limit: usize, tasks: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let gate = Semaphore::new(limit.max(1));
    let gated = tasks.into_iter().map(|task| {
        let gate = &gate;
        async move {
            let _permit = gate.acquire().await;
            task.await
        }
    });
    join_all(gated).await
}

// == Wait With Timeout ==
/// Awaits all `tasks`, each bounded by `timeout`, and splits the outcomes.
///
/// Never fails as a whole. Both lists keep the input order of their tasks.
pub async fn wait_for_with_timeout<I, F, T, E>(tasks: I, timeout: Duration) -> (Vec<T>, Vec<TaskFailure<E>>)
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let outcomes = join_all(tasks.into_iter().map(|task| tokio::time::timeout(timeout, task))).await;

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Ok(value)) => successes.push(value),
            Ok(Err(error)) => failures.push(TaskFailure::Failed(error)),
            Err(_) => failures.push(TaskFailure::TimedOut(timeout)),
        }
    }
    (successes, failures)
}

// == Timed ==
/// Awaits `future` and logs how long it took.
///
/// Logs a warning when `threshold` is set and exceeded.
pub async fn timed<F: Future>(name: &str, threshold: Option<Duration>, future: F) -> F::Output {
    let started = Instant::now();
    let output = future.await;
    let elapsed = started.elapsed();

    debug!(operation = name, elapsed_ms = elapsed.as_millis() as u64, "Operation finished");
    if let Some(threshold) = threshold {
        if elapsed > threshold {
            warn!(
                operation = name,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Slow operation"
            );
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    async fn tracked(gauge: Arc<Gauge>, delay_ms: u64, value: u32) -> Result<u32, String> {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn test_gather_respects_limit_and_order() {
        let gauge = Arc::new(Gauge::default());
        // Later tasks finish first, order must still follow the input
        let tasks = (0..10u32).map(|i| tracked(Arc::clone(&gauge), 50 - u64::from(i) * 4, i));

        let results = gather_with_concurrency(3, tasks).await.unwrap();

        assert_eq!(results, (0..10).collect::<Vec<_>>());
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_gather_zero_limit_runs_one_at_a_time() {
        let gauge = Arc::new(Gauge::default());
        let tasks = (0..4u32).map(|i| tracked(Arc::clone(&gauge), 5, i));

        let results = gather_with_concurrency(0, tasks).await.unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gather_first_error_fails() {
        let tasks = (0..5u32).map(|i| async move {
            if i == 2 {
                Err(format!("task {i} failed"))
            } else {
                Ok(i)
            }
        });

        let result = gather_with_concurrency(2, tasks).await;

        assert_eq!(result, Err("task 2 failed".to_string()));
    }

    #[tokio::test]
    async fn test_gather_settled_keeps_every_outcome() {
        let gauge = Arc::new(Gauge::default());
        let tasks = (0..6u32).map(|i| {
            let gauge = Arc::clone(&gauge);
            async move {
                let value = tracked(gauge, 10, i).await?;
                if value % 3 == 1 {
                    Err(format!("task {value} failed"))
                } else {
                    Ok(value)
                }
            }
        });

        let results = gather_settled_with_concurrency(2, tasks).await;

        assert_eq!(
            results,
            vec![
                Ok(0),
                Err("task 1 failed".to_string()),
                Ok(2),
                Ok(3),
                Err("task 4 failed".to_string()),
                Ok(5),
            ]
        );
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_gather_empty() {
        let tasks: Vec<std::future::Ready<Result<u8, String>>> = Vec::new();

        assert_eq!(gather_with_concurrency(4, tasks).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_wait_for_partitions_outcomes() {
        let delays = [10u64, 500, 20, 0];
        let tasks = delays.iter().enumerate().map(|(i, &delay)| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if delay == 0 {
                Err(format!("task {i} rejected"))
            } else {
                Ok(i)
            }
        });

        let (ok, failed) = wait_for_with_timeout(tasks, Duration::from_millis(200)).await;

        assert_eq!(ok, vec![0, 2]);
        assert_eq!(failed.len(), 2);
        assert!(failed[0].is_timeout());
        assert!(matches!(&failed[1], TaskFailure::Failed(msg) if msg == "task 3 rejected"));
    }

    #[tokio::test]
    async fn test_timed_returns_output() {
        let value = timed("sum", Some(Duration::from_secs(5)), async { 2 + 2 }).await;
        assert_eq!(value, 4);

        let slow = timed("slow", Some(Duration::from_millis(1)), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "late"
        })
        .await;
        assert_eq!(slow, "late");
    }
}
