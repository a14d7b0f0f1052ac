//! Pre-Refresh Executor: a bounded worker pool that enforces
//! at-most-one in-flight refresh per key, backed by a semaphore (worker
//! budget) and an in-flight job map. The default rejection policy when the
//! semaphore is saturated is "caller-runs": the submitting task itself runs
//! the refresh rather than dropping it.

use cache_domain::PreRefreshConfig;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Tracks which keys currently have a refresh in flight (with the time it
/// started, so a stuck job can be swept after `cleanup.invocation_max_idle_ms`
/// even if its completion notification was missed), plus the worker budget
/// semaphore shared across submissions. Cheap to clone: every field is
/// already reference-counted, so a clone shares the same bookkeeping.
#[derive(Clone)]
pub struct PreRefreshExecutor {
    in_flight: Arc<Mutex<HashMap<String, Instant>>>,
    semaphore: Arc<Semaphore>,
    queue_depth: Arc<Semaphore>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accepting: Arc<AtomicBool>,
}

impl PreRefreshExecutor {
    /// Build an executor sized per `config`. `max` becomes the worker
    /// budget; `queue` bounds how many submissions may be waiting for a
    /// worker before the caller-runs policy kicks in.
    pub fn new(config: &PreRefreshConfig) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(config.max)),
            queue_depth: Arc::new(Semaphore::new(config.queue)),
            handles: Arc::new(Mutex::new(Vec::new())),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of keys with a refresh currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Whether `key` currently has a refresh in flight.
    pub async fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().await.contains_key(key)
    }

    /// Submit `task` for `key`. If a refresh for `key` is already in
    /// flight, the submission is dropped silently (at-most-one-per-key).
    /// Otherwise the task runs on a pool worker, or inline ("caller-runs")
    /// if the queue is saturated.
    #[instrument(skip(self, task))]
    pub async fn submit<F>(&self, key: String, task: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(key, "executor is shutting down, submission dropped");
            return;
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&key) {
                debug!(key, "refresh already in flight, submission dropped");
                return;
            }
            in_flight.insert(key.clone(), Instant::now());
        }

        // Drop handles for jobs that already finished so the bookkeeping
        // vec doesn't grow unbounded across the executor's lifetime.
        self.handles.lock().await.retain(|h| !h.is_finished());

        match self.queue_depth.clone().try_acquire_owned() {
            Ok(queue_permit) => {
                let semaphore = self.semaphore.clone();
                let in_flight = self.in_flight.clone();
                let spawn_key = key.clone();
                let handle = tokio::spawn(async move {
                    let _queue_permit = queue_permit;
                    let _worker_permit = semaphore.acquire_owned().await.ok();
                    task().await;
                    in_flight.lock().await.remove(&spawn_key);
                });
                self.handles.lock().await.push(handle);
            }
            Err(_) => {
                warn!(key, "pre-refresh queue saturated, running inline (caller-runs)");
                task().await;
                self.in_flight.lock().await.remove(&key);
            }
        }
    }

    /// Cancel the in-flight marker for `key` (best-effort: this only clears
    /// the bookkeeping entry, it does not abort an already-spawned task).
    pub async fn cancel(&self, key: &str) {
        self.in_flight.lock().await.remove(key);
    }

    /// Drop any in-flight record older than `max_idle`. A job's completion
    /// always removes its own record; this only matters if that
    /// notification was missed (e.g. the spawned task panicked between the
    /// loader call and the cleanup line), which would otherwise wedge that
    /// key out of future pre-refresh submissions forever. Returns the
    /// number of records swept.
    pub async fn sweep(&self, max_idle: Duration) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        let before = in_flight.len();
        in_flight.retain(|_, started| started.elapsed() < max_idle);
        let removed = before - in_flight.len();
        if removed > 0 {
            debug!(removed, "swept stale pre-refresh in-flight records");
        }
        removed
    }

    /// Stop accepting new jobs, wait up to `grace` for outstanding jobs to
    /// finish on their own, then abort whatever is still running.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.in_flight.lock().await.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("pre-refresh grace period elapsed with jobs still in flight, forcing termination");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        self.in_flight.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> PreRefreshConfig {
        PreRefreshConfig {
            core: 2,
            max: 2,
            queue: 8,
            keep_alive_seconds: 60,
        }
    }

    #[tokio::test]
    async fn second_submission_for_same_key_is_dropped_while_in_flight() {
        let executor = PreRefreshExecutor::new(&config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_a = calls.clone();
        executor
            .submit("k".to_string(), move || {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    calls_a.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        let calls_b = calls.clone();
        executor
            .submit("k".to_string(), move || {
                Box::pin(async move {
                    calls_b.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_entry_is_removed_after_completion() {
        let executor = PreRefreshExecutor::new(&config());
        executor
            .submit("k".to_string(), || Box::pin(async move {}))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!executor.is_in_flight("k").await);
    }

    #[tokio::test]
    async fn distinct_keys_both_run() {
        let executor = PreRefreshExecutor::new(&config());
        let calls = Arc::new(AtomicU32::new(0));

        for key in ["a", "b"] {
            let calls = calls.clone();
            executor
                .submit(key.to_string(), move || {
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_jobs_within_grace() {
        let executor = PreRefreshExecutor::new(&config());
        let completed = Arc::new(AtomicU32::new(0));
        let completed_clone = completed.clone();
        executor
            .submit("k".to_string(), move || {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    completed_clone.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        executor.shutdown(Duration::from_millis(500)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_submissions() {
        let executor = PreRefreshExecutor::new(&config());
        executor.shutdown(Duration::from_millis(10)).await;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        executor
            .submit("k".to_string(), move || {
                Box::pin(async move {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sweep_drops_only_records_older_than_max_idle() {
        let executor = PreRefreshExecutor::new(&config());
        // Simulate a job whose completion notification was missed by
        // inserting directly into the in-flight map rather than through a
        // real spawned task.
        executor.in_flight.lock().await.insert("stuck".to_string(), Instant::now());
        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.in_flight.lock().await.insert("fresh".to_string(), Instant::now());

        let removed = executor.sweep(Duration::from_millis(15)).await;
        assert_eq!(removed, 1);
        assert!(!executor.is_in_flight("stuck").await);
        assert!(executor.is_in_flight("fresh").await);
    }

    #[tokio::test]
    async fn shutdown_force_terminates_jobs_exceeding_the_grace_period() {
        let executor = PreRefreshExecutor::new(&config());
        let completed = Arc::new(AtomicU32::new(0));
        let completed_clone = completed.clone();
        executor
            .submit("slow".to_string(), move || {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    completed_clone.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        executor.shutdown(Duration::from_millis(20)).await;
        assert!(!executor.is_in_flight("slow").await);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }
}
