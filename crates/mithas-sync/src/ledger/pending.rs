//! Ledger<P>: bookkeeping for in-flight local mutations.
//!
//! At most one operation per entity is recorded. The engine's turn queue
//! (see [`super::turns`]) keeps later mutations out until the earlier one
//! resolves; `begin` refuses a second entry regardless, so an optimistic
//! value can never be overwritten without passing through the ledger.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SyncError};
use crate::types::{EntityId, MutationKind, OperationId, OperationStatus, Record};

/// One in-flight mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation<P> {
    pub operation_id: OperationId,
    pub entity_id: EntityId,
    pub kind: MutationKind,
    /// Value before the optimistic write; `None` if the entity was absent.
    pub snapshot_before_apply: Option<Record<P>>,
    pub status: OperationStatus,
}

/// How a remote call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Confirmed,
    Failed,
}

/// A ledger entry removed by [`Ledger::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<P> {
    Confirmed {
        operation_id: OperationId,
        entity_id: EntityId,
        kind: MutationKind,
    },
    /// Carries the pre-mutation snapshot needed for rollback.
    Failed {
        operation_id: OperationId,
        entity_id: EntityId,
        kind: MutationKind,
        snapshot: Option<Record<P>>,
    },
}

impl<P> Resolved<P> {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Confirmed { entity_id, .. } | Self::Failed { entity_id, .. } => entity_id,
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self {
            Self::Confirmed { .. } => OperationStatus::Confirmed,
            Self::Failed { .. } => OperationStatus::Failed,
        }
    }
}

pub struct Ledger<P> {
    store: &'static str,
    operations: BTreeMap<OperationId, PendingOperation<P>>,
    by_entity: HashMap<EntityId, OperationId>,
    next_id: u64,
}

impl<P> Ledger<P> {
    pub fn new(store: &'static str) -> Self {
        Self {
            store,
            operations: BTreeMap::new(),
            by_entity: HashMap::new(),
            next_id: 1,
        }
    }

    /// Record a new in-flight operation against `entity_id`.
    pub fn begin(
        &mut self,
        entity_id: &str,
        kind: MutationKind,
        snapshot_before_apply: Option<Record<P>>,
    ) -> Result<OperationId> {
        if self.by_entity.contains_key(entity_id) {
            return Err(SyncError::Conflict {
                store: self.store,
                entity_id: entity_id.to_string(),
            });
        }

        let operation_id = OperationId(self.next_id);
        self.next_id += 1;

        self.by_entity.insert(entity_id.to_string(), operation_id);
        self.operations.insert(
            operation_id,
            PendingOperation {
                operation_id,
                entity_id: entity_id.to_string(),
                kind,
                snapshot_before_apply,
                status: OperationStatus::InFlight,
            },
        );
        Ok(operation_id)
    }

    /// Remove the entry for `operation_id`. Returns `None` if it was already
    /// resolved.
    pub fn resolve(&mut self, operation_id: OperationId, outcome: Settlement) -> Option<Resolved<P>> {
        let op = self.operations.remove(&operation_id)?;
        self.by_entity.remove(&op.entity_id);

        Some(match outcome {
            Settlement::Confirmed => Resolved::Confirmed {
                operation_id,
                entity_id: op.entity_id,
                kind: op.kind,
            },
            Settlement::Failed => Resolved::Failed {
                operation_id,
                entity_id: op.entity_id,
                kind: op.kind,
                snapshot: op.snapshot_before_apply,
            },
        })
    }

    pub fn has_pending(&self, entity_id: &str) -> bool {
        self.by_entity.contains_key(entity_id)
    }

    pub fn pending_for(&self, entity_id: &str) -> Option<&PendingOperation<P>> {
        self.by_entity
            .get(entity_id)
            .and_then(|id| self.operations.get(id))
    }

    /// In-flight operations in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation<P>> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
