//! # Event Bus
//!
//! A typed listener registry shared by the peer overlay, the transaction
//! pool, and the account ledger. Each registry is parameterized by a
//! payload type and an event-kind enum, so subscribers receive strongly
//! typed payloads for exactly the kinds they asked for.
//!
//! Notification is synchronous in the emitting thread. By convention,
//! emitters release any locks they hold before notifying; a listener that
//! re-enters the emitting component must not deadlock on it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Callback signature for listeners. Payloads are passed by reference;
/// listeners clone what they need to keep.
pub type Listener<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Opaque handle returned by [`Listeners::add_listener`], used to remove
/// the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registry of listeners keyed by event kind.
///
/// Reads (notification) take a shared lock; registration takes the write
/// lock. Registration is rare and happens at wiring time, so contention
/// is not a concern.
pub struct Listeners<T, E>
where
    E: Eq + Hash + Copy,
{
    inner: RwLock<HashMap<E, Vec<(ListenerId, Listener<T>)>>>,
    next_id: AtomicU64,
}

impl<T, E> Listeners<T, E>
where
    E: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a listener for one event kind and returns a removal handle.
    pub fn add_listener(&self, event: E, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.write().entry(event).or_default().push((id, listener));
        id
    }

    /// Removes a previously registered listener. Returns `true` if it was
    /// still registered.
    pub fn remove_listener(&self, event: E, id: ListenerId) -> bool {
        let mut inner = self.inner.write();
        if let Some(list) = inner.get_mut(&event) {
            let before = list.len();
            list.retain(|(lid, _)| *lid != id);
            return list.len() != before;
        }
        false
    }

    /// Invokes every listener registered for `event` with `payload`.
    ///
    /// Holds the registry's read lock for the duration of the callbacks,
    /// which is safe because registration never happens from inside a
    /// callback in this codebase.
    pub fn notify(&self, event: E, payload: &T) {
        let inner = self.inner.read();
        if let Some(list) = inner.get(&event) {
            for (_, listener) in list {
                listener(payload);
            }
        }
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: E) -> usize {
        self.inner.read().get(&event).map(Vec::len).unwrap_or(0)
    }
}

impl<T, E> Default for Listeners<T, E>
where
    E: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
