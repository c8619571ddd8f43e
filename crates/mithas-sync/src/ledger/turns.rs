//! EntityTurns: FIFO admission of mutations, one entity at a time.
//!
//! Each mutation takes a [`Turn`] when it is dispatched. Turns on the same
//! entity form a chain: a turn waits for its predecessor's release signal (a
//! `oneshot` sender dropped together with the predecessor's `Turn`). The chain
//! is built synchronously at dispatch time, so admission order is dispatch
//! order no matter how the spawned tasks are scheduled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::config::ConflictPolicy;
use crate::error::{Result, SyncError};
use crate::types::EntityId;

/// Tail of an entity's chain: the most recently admitted turn.
struct Slot {
    ticket: u64,
    released: oneshot::Receiver<()>,
}

type Slots = Arc<Mutex<HashMap<EntityId, Slot>>>;

pub struct EntityTurns {
    store: &'static str,
    slots: Slots,
    next_ticket: AtomicU64,
}

impl EntityTurns {
    pub fn new(store: &'static str) -> Self {
        Self {
            store,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Take a turn on `entity_id`.
    ///
    /// With [`ConflictPolicy::Reject`] this fails if any turn on the entity
    /// is still held; with [`ConflictPolicy::Queue`] the returned turn waits
    /// for the current tail.
    pub fn enter(&self, entity_id: &str, policy: ConflictPolicy) -> Result<Turn> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (release, released) = oneshot::channel();

        let mut slots = self.slots.lock();
        if policy == ConflictPolicy::Reject && slots.contains_key(entity_id) {
            return Err(SyncError::Conflict {
                store: self.store,
                entity_id: entity_id.to_string(),
            });
        }

        let predecessor = slots
            .insert(entity_id.to_string(), Slot { ticket, released })
            .map(|prev| prev.released);

        Ok(Turn {
            entity_id: entity_id.to_string(),
            ticket,
            predecessor,
            _release: release,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Whether any turn on `entity_id` is held or waiting.
    pub fn is_busy(&self, entity_id: &str) -> bool {
        self.slots.lock().contains_key(entity_id)
    }
}

/// Exclusive right to mutate one entity. Dropping it admits the next turn.
pub struct Turn {
    entity_id: EntityId,
    ticket: u64,
    predecessor: Option<oneshot::Receiver<()>>,
    _release: oneshot::Sender<()>,
    slots: Slots,
}

impl Turn {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// True when no earlier turn on the entity is still held.
    pub fn is_ready(&mut self) -> bool {
        match self.predecessor.as_mut() {
            None => true,
            Some(rx) => match rx.try_recv() {
                Err(TryRecvError::Empty) => false,
                // Predecessor dropped (or signalled): nothing left to wait for.
                Ok(()) | Err(TryRecvError::Closed) => {
                    self.predecessor = None;
                    true
                }
            },
        }
    }

    /// Wait until every earlier turn on the entity has been released.
    pub async fn wait(&mut self) {
        if let Some(rx) = self.predecessor.take() {
            // An error only means the sender was dropped, which is the signal.
            let _ = rx.await;
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots
            .get(&self.entity_id)
            .is_some_and(|slot| slot.ticket == self.ticket)
        {
            slots.remove(&self.entity_id);
        }
        // `_release` drops after this body and wakes the successor, if any.
    }
}
