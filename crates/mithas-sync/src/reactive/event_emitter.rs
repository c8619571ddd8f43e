//! EventEmitter<T>: typed synchronous pub/sub for store observers.
//!
//! Listeners are stored as `Arc<dyn Fn(&T)>` so the list can be snapshotted
//! cheaply before each emit:
//!   - a listener removed *during* emission is still called in that round;
//!   - a listener added *during* emission is first called on the next emit.
//!
//! The internal lock is released before any listener runs, so listeners may
//! read the store, subscribe or unsubscribe from inside a callback. A
//! panicking listener is logged and skipped; the remaining listeners still
//! run and the panic never reaches the reconciliation pass that emitted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Returned by [`EventEmitter::on`]; pass to [`EventEmitter::off`].
pub type ListenerId = u64;

pub type ListenerFn<T> = dyn Fn(&T) + Send + Sync;

pub struct EventEmitter<T> {
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn<T>>)>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Call every registered listener with `event`, in registration order.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<(ListenerId, Arc<ListenerFn<T>>)> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };
        for (id, cb) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                tracing::warn!(listener = id, "store listener panicked; continuing");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
