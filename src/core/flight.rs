//! Single-flight execution keyed by an arbitrary value.
//!
//! The first caller for a key spawns the work as a detached task; callers
//! arriving while it runs subscribe to the same result. Because the work is
//! detached, a caller that stops waiting (timeout, cancellation) never
//! aborts it for everyone else.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

/// Handle on an in-flight (or just finished) operation
pub struct Flight<V> {
    rx: watch::Receiver<Option<V>>,
    leader: bool,
}

impl<V: Clone> Flight<V> {
    /// Whether this caller started the operation
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Wait for the shared result.
    ///
    /// Returns None only if the task died without producing a value.
    pub async fn wait(mut self) -> Option<V> {
        match self.rx.wait_for(|v| v.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}

/// Collapses concurrent operations on the same key into one
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the key when the task ends, including by panic
struct FlightGuard<K: Eq + Hash, V> {
    group: Arc<SingleFlight<K, V>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        self.group.lock().remove(&self.key);
    }
}

impl<K, V> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of keys with work currently running
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Whether work for `key` is running right now
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Join the flight for `key`, or start one by spawning `make()`.
    ///
    /// `make` is only called when this caller becomes the leader.
    pub fn join_or_start<F, Fut>(self: &Arc<Self>, key: K, make: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut map = self.lock();
        if let Some(rx) = map.get(&key) {
            return Flight {
                rx: rx.clone(),
                leader: false,
            };
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key.clone(), rx.clone());
        drop(map);

        let work = make();
        let guard = FlightGuard {
            group: Arc::clone(self),
            key,
        };

        tokio::spawn(async move {
            let value = work.await;
            // Unregister first so late arrivals start fresh instead of
            // reading a result they did not ask for.
            drop(guard);
            let _ = tx.send(Some(value));
        });

        Flight { rx, leader: true }
    }
}
