//! Single-flight request coalescing.
//!
//! [`SingleFlight`] maps a request key to one shared computation. The first
//! caller for a key starts the work; every caller arriving while it runs, or
//! after it succeeded, joins the same shared result.
//!
//! ```text
//!  run(k) ──► ┌──────────────┐
//!             │ flights[k]?  │──► present ──► Joined  ──► await shared future
//!             └──────┬───────┘
//!                    │ absent
//!                    ▼
//!             tokio::spawn(work) ──► Started ──► await shared future
//!                    │
//!                    ▼
//!             Ok  ──► entry kept for the session
//!             Err ──► delivered to all waiters, entry removed
//! ```
//!
//! The work is spawned onto the runtime, so it runs to completion even when
//! every caller stops waiting. Successful results are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// How a call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// This call started the computation.
    Started,
    /// This call joined a pending or completed computation.
    Joined,
}

struct Slot<V, E> {
    generation: u64,
    result: SharedResult<V, E>,
}

/// A handle on a (possibly still running) shared computation.
pub struct Ticket<V, E> {
    flight: Flight,
    result: SharedResult<V, E>,
}

impl<V, E> Ticket<V, E>
where
    V: Clone,
    E: Clone,
{
    pub fn flight(&self) -> Flight {
        self.flight
    }

    /// Wait for the shared result.
    pub async fn wait(self) -> Result<V, E> {
        self.result.await
    }
}

/// Keyed map of shared computations, at most one in flight per key.
pub struct SingleFlight<K, V, E> {
    flights: Arc<Mutex<HashMap<K, Slot<V, E>>>>,
    next_generation: AtomicU64,
    label: &'static str,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    /// Create an empty map; `label` tags its log lines.
    pub fn new(label: &'static str) -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            label,
        }
    }

    /// Join the computation for `key`, starting it with `work` if none exists.
    ///
    /// `work` is only called when this call starts the computation. Must be
    /// called from within a Tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: K, work: F) -> Ticket<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut flights = self.flights.lock();

        if let Some(slot) = flights.get(&key) {
            tracing::trace!(label = self.label, key = ?key, "Joined in-flight request");
            return Ticket {
                flight: Flight::Joined,
                result: slot.result.clone(),
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let future = work();
        let label = self.label;

        let registry = Arc::clone(&self.flights);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = future.await;
            if result.is_err() {
                drop_slot(&registry, &task_key, generation, label);
            }
            result
        });

        // A panicked task never reaches its own cleanup
        let registry = Arc::clone(&self.flights);
        let task_key = key.clone();
        let result = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    drop_slot(&registry, &task_key, generation, label);
                    Err(E::from(e))
                }
            }
        }
        .boxed()
        .shared();

        flights.insert(
            key,
            Slot {
                generation,
                result: result.clone(),
            },
        );

        Ticket {
            flight: Flight::Started,
            result,
        }
    }

    /// Join or start the computation for `key` and wait for its result.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.join_or_start(key, work).wait().await
    }

    /// Whether a pending or completed computation exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }

    /// Number of keys with a pending or completed computation.
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }

    /// Forget the computation for `key`. Callers already waiting on it still
    /// receive its result.
    pub fn forget(&self, key: &K) -> bool {
        self.flights.lock().remove(key).is_some()
    }

    /// Keep only the keys matching `keep`; returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut flights = self.flights.lock();
        let before = flights.len();
        flights.retain(|key, _| keep(key));
        before - flights.len()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Remove the slot for `key` if it still belongs to `generation`.
fn drop_slot<K, V, E>(
    flights: &Mutex<HashMap<K, Slot<V, E>>>,
    key: &K,
    generation: u64,
    label: &'static str,
) where
    K: Eq + Hash + std::fmt::Debug,
{
    let mut flights = flights.lock();
    if flights
        .get(key)
        .is_some_and(|slot| slot.generation == generation)
    {
        flights.remove(key);
        tracing::debug!(label, key = ?key, "Dropped failed request");
    }
}
