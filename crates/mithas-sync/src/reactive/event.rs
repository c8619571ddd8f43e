//! StoreEvent: one notification per reconciliation pass.

use crate::types::EntityId;

/// What produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeCause {
    /// A local intent was applied ahead of the remote call.
    Optimistic,
    /// A remote call succeeded and the authoritative value replaced the guess.
    Confirmed,
    /// A remote call failed and the pre-mutation value was restored.
    RolledBack,
    /// A realtime event from another client was applied.
    Realtime,
    /// A full fetch from the remote authority was reconciled.
    Refreshed,
}

/// Emitted after a pass that changed at least one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub store: &'static str,
    pub cause: ChangeCause,
    /// Every entity the pass touched, sorted.
    pub ids: Vec<EntityId>,
}

impl StoreEvent {
    pub fn touches(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }
}
