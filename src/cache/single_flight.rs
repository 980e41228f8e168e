//! At most one in-flight fetch per key
//!
//! The first caller for a key becomes the leader: its fetch future is boxed,
//! made [`Shared`] and parked in the in-flight map. Later callers clone the
//! shared handle and await the same outcome. The future removes its own map
//! entry when it settles, so a failure is never cached.
//!
//! A successful outcome is committed (written to the tiers) only while the
//! entry is still the current one for its key. [`SingleFlightLoader::forget`]
//! detaches a fetch that has not reached its commit, so its result is handed
//! to its waiters but never stored; a fetch already committing is waited for
//! instead, so whatever the caller removes next stays removed.

use crate::cache::types::{CacheValue, ScopedKey};
use crate::error::FetchError;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Outcome shared by every waiter of one fetch
pub type FetchOutcome = Result<CacheValue, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Whether a caller started the fetch or attached to one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRole {
    Leader,
    Joined,
}

struct InFlight {
    id: u64,
    committing: bool,
    fetch: SharedFetch,
}

type InFlightMap = HashMap<ScopedKey, InFlight>;

/// Deduplicates concurrent fetches of the same key
///
/// Different keys never wait on each other; the map lock is held only to
/// look up or update a handle, never across an await.
#[derive(Default)]
pub struct SingleFlightLoader {
    in_flight: Arc<Mutex<InFlightMap>>,
    next_id: AtomicU64,
}

fn lock(map: &Mutex<InFlightMap>) -> MutexGuard<'_, InFlightMap> {
    // The map holds no invariant a panicking holder could break
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mark the entry as committing if it still belongs to fetch `id`
fn begin_commit(map: &Mutex<InFlightMap>, key: &ScopedKey, id: u64) -> bool {
    match lock(map).get_mut(key) {
        Some(entry) if entry.id == id => {
            entry.committing = true;
            true
        }
        _ => false,
    }
}

fn settle(map: &Mutex<InFlightMap>, key: &ScopedKey, id: u64) {
    let mut in_flight = lock(map);
    if in_flight.get(key).map(|f| f.id) == Some(id) {
        in_flight.remove(key);
    }
}

impl SingleFlightLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch_fn` unless a fetch for `key` is already in flight, then
    /// await the shared outcome
    ///
    /// `fetch_fn` is called at most once, and only by the leader.
    pub async fn load_or_join<F, Fut>(&self, key: ScopedKey, fetch_fn: F) -> (FetchOutcome, LoadRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        self.load_and_commit(key, fetch_fn, |_| future::ready(()))
            .await
    }

    /// Like [`load_or_join`](Self::load_or_join), with `commit` run on a
    /// successful value before any waiter is released
    ///
    /// `commit` is skipped when the fetch was detached by
    /// [`forget`](Self::forget) before it finished.
    pub async fn load_and_commit<F, Fut, C, CFut>(
        &self,
        key: ScopedKey,
        fetch_fn: F,
        commit: C,
    ) -> (FetchOutcome, LoadRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
        C: FnOnce(CacheValue) -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let (fetch, role) = {
            let mut in_flight = lock(&self.in_flight);

            match in_flight.get(&key) {
                Some(existing) => {
                    debug!("Joining in-flight fetch: {}", key);
                    (existing.fetch.clone(), LoadRole::Joined)
                }
                None => {
                    debug!("Starting fetch: {}", key);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let map = Arc::clone(&self.in_flight);
                    let settled_key = key.clone();
                    let fut = fetch_fn();

                    let fetch = async move {
                        let outcome = fut.await;
                        if let Ok(value) = &outcome {
                            if begin_commit(&map, &settled_key, id) {
                                commit(value.clone()).await;
                            } else {
                                debug!("Fetch for {} was detached; result not stored", settled_key);
                            }
                        }
                        settle(&map, &settled_key, id);
                        outcome
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(
                        key,
                        InFlight {
                            id,
                            committing: false,
                            fetch: fetch.clone(),
                        },
                    );
                    (fetch, LoadRole::Leader)
                }
            }
        };

        (fetch.await, role)
    }

    /// Whether a fetch for `key` is currently in flight
    pub fn is_in_flight(&self, key: &ScopedKey) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    /// Number of keys with a fetch in flight
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Detach the in-flight fetch for `key`, if any
    ///
    /// Current waiters still receive its outcome, but it is not committed;
    /// the next caller starts a new fetch. A fetch already committing is
    /// awaited, so on return nothing from it can still land in the tiers.
    pub async fn forget(&self, key: &ScopedKey) -> bool {
        let committing = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                None => return false,
                Some(entry) if entry.committing => entry.fetch.clone(),
                Some(_) => {
                    in_flight.remove(key);
                    debug!("Detached in-flight fetch: {}", key);
                    return true;
                }
            }
        };

        debug!("Waiting for committing fetch: {}", key);
        let _ = committing.await;
        true
    }
}
