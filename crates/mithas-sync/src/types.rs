use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a record within one store.
pub type EntityId = String;

/// Server-assigned, per-entity monotonic version marker. `0` means the
/// entity has never been confirmed by the server.
pub type Sequence = u64;

/// Client-generated identifier of one in-flight mutation. Unique and
/// monotonic per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the currently visible value of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Applied locally; an in-flight operation exists for the entity.
    LocalOptimistic,
    /// Last written from an authoritative reply, fetch or realtime event.
    Confirmed,
    /// Loaded from persistence; provisional until the next refresh.
    Restored,
}

/// A record held by an entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<P> {
    pub id: EntityId,
    pub payload: P,
    /// Sequence of the last authoritative write. Optimistic records keep the
    /// sequence of the value they were derived from.
    pub sequence: Sequence,
    pub origin: Origin,
}

impl<P> Record<P> {
    pub fn confirmed(id: impl Into<EntityId>, payload: P, sequence: Sequence) -> Self {
        Self {
            id: id.into(),
            payload,
            sequence,
            origin: Origin::Confirmed,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == Origin::LocalOptimistic
    }
}

/// The shape of a local mutation, stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Update,
    Remove,
    /// Changes store-level derived state (e.g. applying a coupon).
    Recompute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    InFlight,
    Confirmed,
    Failed,
}

// ============================================================================
// Remote-origin changes
// ============================================================================

/// A remote-confirmed change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "lowercase")]
pub enum RemoteChange<P> {
    Put(P),
    Delete,
}

/// A change pushed by the realtime transport, or carried in a confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent<P> {
    pub entity_id: EntityId,
    pub change: RemoteChange<P>,
    pub sequence: Sequence,
}

impl<P> RemoteEvent<P> {
    pub fn put(entity_id: impl Into<EntityId>, payload: P, sequence: Sequence) -> Self {
        Self {
            entity_id: entity_id.into(),
            change: RemoteChange::Put(payload),
            sequence,
        }
    }

    pub fn delete(entity_id: impl Into<EntityId>, sequence: Sequence) -> Self {
        Self {
            entity_id: entity_id.into(),
            change: RemoteChange::Delete,
            sequence,
        }
    }

    pub fn payload(&self) -> Option<&P> {
        match &self.change {
            RemoteChange::Put(payload) => Some(payload),
            RemoteChange::Delete => None,
        }
    }
}

/// One record of a full authoritative fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord<P> {
    pub id: EntityId,
    pub payload: P,
    pub sequence: Sequence,
}

impl<P> ServerRecord<P> {
    pub fn new(id: impl Into<EntityId>, payload: P, sequence: Sequence) -> Self {
        Self {
            id: id.into(),
            payload,
            sequence,
        }
    }
}

impl<P> From<ServerRecord<P>> for RemoteEvent<P> {
    fn from(record: ServerRecord<P>) -> Self {
        RemoteEvent::put(record.id, record.payload, record.sequence)
    }
}

/// Authoritative reply to a mutation.
///
/// `primary` describes the targeted entity. Its `entity_id` may differ from
/// the one the mutation targeted when the server assigns its own id; the
/// local record is then re-keyed. `side_effects` are other entities the
/// server changed as part of the same mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation<P> {
    pub primary: RemoteEvent<P>,
    pub side_effects: Vec<RemoteEvent<P>>,
}

impl<P> Confirmation<P> {
    pub fn of(primary: RemoteEvent<P>) -> Self {
        Self {
            primary,
            side_effects: Vec::new(),
        }
    }

    pub fn with_side_effect(mut self, event: RemoteEvent<P>) -> Self {
        self.side_effects.push(event);
        self
    }
}
