//! Per-key request coalescing.
//!
//! [`SingleFlight`] lets many concurrent callers share one in-flight computation
//! per key. The first caller becomes the leader and runs the work; every caller
//! that arrives while it runs waits and receives a clone of the leader's result.
//!
//! Used for:
//! - local slide downloads (one `fetch_stream` per object)
//! - decoder opens (one handle per slide)
//! - tile rendering (one decode + encode per tile key)
//!
//! If the leader's future is dropped before it completes, the key is released
//! and the waiters race to become the next leader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// State for one in-flight computation.
struct InFlightState<T> {
    /// Woken when the leader finishes or gives up
    notify: Notify,
    /// Result of the computation (set by the leader before waking waiters)
    result: Mutex<Option<T>>,
}

/// Coalesces concurrent computations that share a key.
pub struct SingleFlight<T> {
    in_flight: Mutex<HashMap<String, Arc<InFlightState<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or wait for the run already in progress.
    ///
    /// Results are not memoised: once the leader finishes, the next call for
    /// the same key starts a fresh computation.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let state = loop {
            let (state, is_leader) = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(key) {
                    Some(state) => (state.clone(), false),
                    None => {
                        let state = Arc::new(InFlightState {
                            notify: Notify::new(),
                            result: Mutex::new(None),
                        });
                        in_flight.insert(key.to_string(), state.clone());
                        (state, true)
                    }
                }
            };

            if is_leader {
                break state;
            }

            // Register before checking so a wakeup between the two is not lost.
            let notified = state.notify.notified();
            let ready = lock(&state.result).clone();
            if let Some(result) = ready {
                return result;
            }
            notified.await;
            let ready = lock(&state.result).clone();
            if let Some(result) = ready {
                return result;
            }
            // Leader was cancelled; try again.
        };

        let _release = Release {
            flight: self,
            key,
            state: &state,
        };
        let result = work().await;
        *lock(&state.result) = Some(result.clone());
        result
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the leader's entry and wakes waiters, on success or cancellation.
struct Release<'a, T> {
    flight: &'a SingleFlight<T>,
    key: &'a str,
    state: &'a Arc<InFlightState<T>>,
}

impl<T> Drop for Release<'_, T> {
    fn drop(&mut self) {
        {
            let mut in_flight = lock(&self.flight.in_flight);
            if let Some(current) = in_flight.get(self.key) {
                if Arc::ptr_eq(current, self.state) {
                    in_flight.remove(self.key);
                }
            }
        }
        self.state.notify.notify_waiters();
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
