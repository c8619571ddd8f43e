//! StoreState<D>: everything a store guards with its single mutex.
//!
//! The entity store, the ledger, the per-entity replay windows and the
//! buffered realtime events change together: a record is tagged
//! `LocalOptimistic` exactly while the ledger holds an operation for it, and
//! both are cleared inside one critical section.

use std::collections::{BTreeMap, HashMap};

use crate::domain::Domain;
use crate::entity::{EntityStore, Snapshot};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::types::{EntityId, OperationId, Origin, Record, RemoteEvent, ServerRecord};

use super::reconcile::{ReconcilePass, Source};
use super::replay::ReplayWindow;

pub(crate) struct StoreState<D: Domain> {
    pub(crate) entities: EntityStore<D>,
    pub(crate) ledger: Ledger<D::Payload>,
    pub(crate) replay: HashMap<EntityId, ReplayWindow>,
    /// Remote changes held back while their entity has a mutation in
    /// flight, keyed by that entity, in arrival order.
    pub(crate) buffered: HashMap<EntityId, Vec<(RemoteEvent<D::Payload>, Source)>>,
    /// Bumped on every write; `written_at` holds the epoch of each entity's
    /// latest write. A refresh only sweeps entities it could have seen.
    epoch: u64,
    written_at: HashMap<EntityId, u64>,
    /// Numbers persisted snapshots in the order they were taken.
    snapshot_revision: u64,
    window: usize,
}

impl<D: Domain> StoreState<D> {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            entities: EntityStore::new(),
            ledger: Ledger::new(D::NAME),
            replay: HashMap::new(),
            buffered: HashMap::new(),
            epoch: 0,
            written_at: HashMap::new(),
            snapshot_revision: 0,
            window,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<D> {
        self.entities.snapshot()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn stamp(&mut self, entity_id: &str) {
        self.epoch += 1;
        self.written_at.insert(entity_id.to_string(), self.epoch);
    }

    pub(crate) fn forget(&mut self, entity_id: &str) {
        self.written_at.remove(entity_id);
    }

    /// Whether `entity_id` was last written at or before `epoch`.
    pub(crate) fn unchanged_since(&self, entity_id: &str, epoch: u64) -> bool {
        self.written_at.get(entity_id).map_or(true, |&at| at <= epoch)
    }

    pub(crate) fn window_for(&mut self, entity_id: &str) -> &mut ReplayWindow {
        let window = self.window;
        self.replay
            .entry(entity_id.to_string())
            .or_insert_with(|| ReplayWindow::new(window))
    }

    /// Apply `intent` optimistically and open its ledger entry.
    ///
    /// Nothing is written unless both the domain accepts the intent against
    /// the current value and the ledger accepts the entry.
    pub(crate) fn begin_optimistic(
        &mut self,
        intent: &D::Intent,
        pass: &mut ReconcilePass,
    ) -> Result<OperationId> {
        let entity_id = D::target(intent);
        let current = self.entities.get(&entity_id).cloned();
        let current_payload = current.as_ref().map(|r| &r.payload);

        let kind = D::kind(intent, current_payload);
        let next = D::apply(intent, current_payload)?;
        let sequence = current.as_ref().map_or(0, |r| r.sequence);

        let operation_id = self.ledger.begin(&entity_id, kind, current)?;

        match next {
            Some(payload) => {
                self.entities.upsert(Record {
                    id: entity_id.clone(),
                    payload,
                    sequence,
                    origin: Origin::LocalOptimistic,
                });
                self.stamp(&entity_id);
            }
            None => {
                self.entities.remove(&entity_id);
            }
        }
        pass.touch(entity_id);
        Ok(operation_id)
    }

    /// The state worth keeping across a restart: every record not under a
    /// local mutation, plus the pre-mutation snapshot of those that are.
    /// Sorted by id.
    pub(crate) fn confirmed_subset(&self) -> Vec<ServerRecord<D::Payload>> {
        let mut subset: BTreeMap<&str, ServerRecord<D::Payload>> = BTreeMap::new();

        for (id, record) in self.entities.records() {
            if !self.ledger.has_pending(id) {
                subset.insert(id, to_server_record(record));
            }
        }
        for op in self.ledger.iter() {
            if let Some(snapshot) = &op.snapshot_before_apply {
                subset.insert(&op.entity_id, to_server_record(snapshot));
            }
        }

        subset.into_values().collect()
    }

    /// [`Self::confirmed_subset`] tagged with a revision that increases
    /// with every call.
    pub(crate) fn persist_snapshot(&mut self) -> (u64, Vec<ServerRecord<D::Payload>>) {
        self.snapshot_revision += 1;
        (self.snapshot_revision, self.confirmed_subset())
    }

    /// Seed an empty store from persisted records. Each record's sequence
    /// becomes the entity's high-water mark.
    pub(crate) fn restore(&mut self, records: Vec<ServerRecord<D::Payload>>) {
        for record in records {
            self.replay.insert(
                record.id.clone(),
                ReplayWindow::starting_at(record.sequence, self.window),
            );
            self.entities.upsert(Record {
                id: record.id,
                payload: record.payload,
                sequence: record.sequence,
                origin: Origin::Restored,
            });
        }
    }
}

fn to_server_record<P: Clone>(record: &Record<P>) -> ServerRecord<P> {
    ServerRecord::new(record.id.clone(), record.payload.clone(), record.sequence)
}
