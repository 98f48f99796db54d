//! Coalescing request cache with tri-state entries.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RemoteArrayError, Result};
use crate::types::CacheStats;

type Outcome<V> = Result<Option<V>>;

/// Cached outcome of a request.
enum Entry<V> {
    Present(V),
    /// Confirmed missing, cached for the lifetime of the cache.
    Absent,
    /// Transient failure, replayed to callers until it expires.
    Failed {
        error: RemoteArrayError,
        expires_at: Instant,
    },
}

/// A request that is currently running.
struct InFlight<V> {
    id: u64,
    future: Shared<BoxFuture<'static, Outcome<V>>>,
    waiters: usize,
    /// Handed to the loader; cancelled when the last waiter leaves.
    token: CancellationToken,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    in_flight: HashMap<K, InFlight<V>>,
}

/// Caches the outcome of keyed asynchronous loads and coalesces concurrent
/// loads of the same key into one.
///
/// Values are assumed immutable once published, so present and absent
/// entries are never invalidated. Transient failures are kept for
/// `failure_ttl` and then retried.
///
/// A caller's cancellation token only ends that caller's wait. When the last
/// waiter of a load leaves, the load's own token is cancelled and its future
/// dropped, which aborts the underlying transfer.
pub struct RequestCache<K, V> {
    state: Mutex<State<K, V>>,
    failure_ttl: Duration,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

/// Tracks one caller's interest in an in-flight load.
struct WaiterGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    cache: &'a RequestCache<K, V>,
    key: &'a K,
    id: u64,
    finished: bool,
}

impl<K, V> Drop for WaiterGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if !self.finished {
            self.cache.leave(self.key, self.id);
        }
    }
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty cache.
    pub fn new(failure_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            }),
            failure_ttl,
            next_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            entries: self.state.lock().entries.len(),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// A waiter stopped waiting before the load finished.
    fn leave(&self, key: &K, id: u64) {
        let mut state = self.state.lock();
        let abandoned = match state.in_flight.get_mut(key) {
            Some(flight) if flight.id == id => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            if let Some(flight) = state.in_flight.remove(key) {
                debug!(key = ?key, "Last waiter left, aborting load");
                flight.token.cancel();
            }
        }
    }

    /// Publish the outcome of load `id`, unless it was abandoned.
    fn complete(&self, key: &K, id: u64, outcome: &Outcome<V>)
    where
        V: Clone,
    {
        let mut state = self.state.lock();
        match state.in_flight.get(key) {
            Some(flight) if flight.id == id => {}
            _ => return,
        }
        state.in_flight.remove(key);

        let entry = match outcome {
            Ok(Some(value)) => Entry::Present(value.clone()),
            Ok(None) => Entry::Absent,
            Err(RemoteArrayError::Cancelled) => return,
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if self.failure_ttl.is_zero() {
                    return;
                }
                Entry::Failed {
                    error: error.clone(),
                    expires_at: Instant::now() + self.failure_ttl,
                }
            }
        };
        state.entries.insert(key.clone(), entry);
    }
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync + 'static,
{
    /// Return the cached outcome for `key`, joining or starting a load when
    /// there is none.
    ///
    /// `load` receives the token that aborts the load and is only called
    /// when no other caller is already loading `key`.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &K,
        cancel: Option<&CancellationToken>,
        load: F,
    ) -> Outcome<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let (id, future) = {
            let mut state = self.state.lock();

            let expired = match state.entries.get(key) {
                Some(Entry::Present(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(value.clone()));
                }
                Some(Entry::Absent) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                Some(Entry::Failed { error, expires_at }) => {
                    if Instant::now() < *expires_at {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Err(error.clone());
                    }
                    true
                }
                None => false,
            };
            if expired {
                state.entries.remove(key);
            }

            if let Some(flight) = state.in_flight.get_mut(key) {
                flight.waiters += 1;
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                (flight.id, flight.future.clone())
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                let future = load(token.clone()).boxed().shared();
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        future: future.clone(),
                        waiters: 1,
                        token,
                    },
                );
                (id, future)
            }
        };

        let mut guard = WaiterGuard {
            cache: self,
            key,
            id,
            finished: false,
        };

        let outcome = match cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RemoteArrayError::Cancelled),
                    outcome = future => outcome,
                }
            }
            None => future.await,
        };

        guard.finished = true;
        self.complete(key, id, &outcome);
        outcome
    }
}
