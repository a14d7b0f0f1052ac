//! Local Lock Registry: per-process reentrant mutexes keyed by
//! `(cache-name, key)`, paired with the distributed lease in the breakdown
//! protocol's triple-check pattern. A periodic sweeper removes mutexes that
//! are unheld and uncontended once they go idle.
//!
//! Reentrancy (spec §4.4/§4.9: "an engine call made inside a loader does not
//! deadlock because the local lock is reentrant") is tracked per Tokio task
//! rather than per OS thread, since a recursive engine call made from inside
//! a user loader resumes on the same task that is already holding the
//! guard. [`with_reentrancy_scope`] installs a task-local recursion counter
//! once per outermost call; [`LocalLockRegistry::lock`] consults it to skip
//! the real mutex acquisition when the current task already holds it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

tokio::task_local! {
    static HELD: RefCell<HashMap<String, u32>>;
}

/// Ensure a task-local reentrancy-tracking scope is active for the current
/// task, then run `fut` inside it. Only the outermost call on a given task
/// installs the scope; a call nested inside another (e.g. a user loader
/// that re-enters the engine for the same `(cache-name, key)`) finds the
/// scope already active via `HELD.try_with` and runs directly inside it, so
/// [`LocalLockRegistry::lock`] sees the outer acquisition and skips
/// blocking.
pub async fn with_reentrancy_scope<F: Future>(fut: F) -> F::Output {
    if HELD.try_with(|_| ()).is_ok() {
        fut.await
    } else {
        HELD.scope(RefCell::new(HashMap::new()), fut).await
    }
}

/// A held (or reentrantly-counted) local lock. Dropping it releases the
/// underlying mutex once the recursion count for its identity returns to
/// zero; a reentrant acquisition (recursion depth > 0) holds no real guard
/// and only decrements the count.
pub struct LocalLockGuard {
    identity: String,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(count) = held.get_mut(&self.identity) {
                *count -= 1;
                if *count == 0 {
                    held.remove(&self.identity);
                }
            }
        });
        // `_guard`, if present, releases the real mutex when it drops after this.
    }
}

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    last_touched: Instant,
}

/// Registry of per-identity reentrant locks.
pub struct LocalLockRegistry {
    entries: StdMutex<HashMap<String, Entry>>,
    max_idle: Duration,
}

impl LocalLockRegistry {
    /// Build a registry that sweeps out locks idle for longer than `max_idle`.
    pub fn new(max_idle: Duration) -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
            max_idle,
        }
    }

    /// Return the mutex for `identity`, creating it on first reference.
    pub fn obtain(&self, identity: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(identity.to_string()).or_insert_with(|| Entry {
            lock: Arc::new(AsyncMutex::new(())),
            last_touched: Instant::now(),
        });
        entry.last_touched = Instant::now();
        entry.lock.clone()
    }

    /// Acquire the lock for `identity`, reentrantly: if the calling task
    /// already holds it (tracked via the task-local recursion counter
    /// installed by [`with_reentrancy_scope`]), this returns immediately
    /// without touching the real mutex; otherwise it awaits the mutex as
    /// usual. Callers outside any `with_reentrancy_scope` still get correct
    /// mutual exclusion (the mutex is always acquired in that case), they
    /// just don't get reentrancy tracking.
    pub async fn lock(&self, identity: &str) -> LocalLockGuard {
        let already_held = HELD
            .try_with(|held| held.borrow().contains_key(identity))
            .unwrap_or(false);

        if already_held {
            HELD.with(|held| {
                *held.borrow_mut().entry(identity.to_string()).or_insert(0) += 1;
            });
            return LocalLockGuard {
                identity: identity.to_string(),
                _guard: None,
            };
        }

        let mutex = self.obtain(identity);
        let guard = mutex.lock_owned().await;
        let _ = HELD.try_with(|held| {
            held.borrow_mut().insert(identity.to_string(), 1);
        });
        LocalLockGuard {
            identity: identity.to_string(),
            _guard: Some(guard),
        }
    }

    /// Number of tracked identities, including currently-held locks.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the registry currently tracks no identities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every tracked lock that is both unheld (`Arc` strong count of
    /// 1, meaning only the registry itself references it) and idle longer
    /// than `max_idle`.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| {
            let uncontended = Arc::strong_count(&entry.lock) <= 1;
            let idle = entry.last_touched.elapsed() >= self.max_idle;
            !(uncontended && idle)
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept idle local locks");
        }
        removed
    }
}
