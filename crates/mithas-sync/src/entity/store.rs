//! EntityStore<D>: in-memory keyed records with synchronously recomputed
//! aggregates.
//!
//! Records live in a `BTreeMap` so iteration (and therefore snapshots and
//! persisted state) is deterministic. Aggregates are recomputed from the
//! full record set on every write; the stores hold tens of entities, and a
//! recompute keeps rollback exact without inverse arithmetic.

use std::collections::BTreeMap;

use crate::domain::Domain;
use crate::types::{EntityId, Record};

/// Immutable copy of a store's records and aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<P, A> {
    pub records: BTreeMap<EntityId, Record<P>>,
    pub aggregates: A,
}

impl<P, A> StoreSnapshot<P, A> {
    pub fn get(&self, id: &str) -> Option<&Record<P>> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Snapshot type of a domain's store.
pub type Snapshot<D> = StoreSnapshot<<D as Domain>::Payload, <D as Domain>::Aggregates>;

pub struct EntityStore<D: Domain> {
    records: BTreeMap<EntityId, Record<D::Payload>>,
    aggregates: D::Aggregates,
}

impl<D: Domain> EntityStore<D> {
    pub fn new() -> Self {
        let records = BTreeMap::new();
        let aggregates = D::aggregate(&records);
        Self {
            records,
            aggregates,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Record<D::Payload>> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Insert or replace a record. Returns the previous value.
    pub fn upsert(&mut self, record: Record<D::Payload>) -> Option<Record<D::Payload>> {
        let previous = self.records.insert(record.id.clone(), record);
        self.recompute();
        previous
    }

    /// Delete a record. Returns the removed value, if any.
    pub fn remove(&mut self, id: &str) -> Option<Record<D::Payload>> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            self.recompute();
        }
        removed
    }

    pub fn aggregates(&self) -> &D::Aggregates {
        &self.aggregates
    }

    pub fn records(&self) -> &BTreeMap<EntityId, Record<D::Payload>> {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot<D> {
        StoreSnapshot {
            records: self.records.clone(),
            aggregates: self.aggregates.clone(),
        }
    }

    fn recompute(&mut self) {
        self.aggregates = D::aggregate(&self.records);
    }
}

impl<D: Domain> Default for EntityStore<D> {
    fn default() -> Self {
        Self::new()
    }
}
