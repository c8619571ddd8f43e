//! Reconciliation of local state against authoritative input.
//!
//! Decision matrix for an inbound remote change, per entity:
//!
//! | Local state                  | Remote change | Action                         |
//! |------------------------------|---------------|--------------------------------|
//! | mutation in flight           | any           | buffer until it settles        |
//! | payload aliases a pending id | any           | buffer under the pending id    |
//! | sequence ≤ high-water / seen | any           | drop (stale)                   |
//! | otherwise                    | put           | upsert as confirmed            |
//! | otherwise                    | delete        | remove                         |
//!
//! A confirmation bypasses the replay check for its own entity: the reply
//! to our mutation always replaces the optimistic value.

use std::collections::{BTreeSet, HashSet};

use crate::domain::Domain;
use crate::ledger::{Resolved, Settlement};
use crate::reactive::{ChangeCause, StoreEvent};
use crate::types::{
    Confirmation, EntityId, OperationId, Record, RemoteChange, RemoteEvent, ServerRecord,
};

use super::state::StoreState;
use super::types::{RealtimeOutcome, RefreshReport};

/// Where a remote change came from. Pushed payloads are merged with the
/// local value through [`Domain::merge_pushed`] when they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Pushed,
    Server,
}

/// Entities touched by one pass. Turned into at most one [`StoreEvent`].
#[derive(Debug)]
pub(crate) struct ReconcilePass {
    pub(crate) cause: ChangeCause,
    changed: BTreeSet<EntityId>,
}

impl ReconcilePass {
    pub(crate) fn new(cause: ChangeCause) -> Self {
        Self {
            cause,
            changed: BTreeSet::new(),
        }
    }

    pub(crate) fn touch(&mut self, id: impl Into<EntityId>) {
        self.changed.insert(id.into());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub(crate) fn into_event(self, store: &'static str) -> Option<StoreEvent> {
        if self.changed.is_empty() {
            return None;
        }
        Some(StoreEvent {
            store,
            cause: self.cause,
            ids: self.changed.into_iter().collect(),
        })
    }
}

impl<D: Domain> StoreState<D> {
    /// Settle `operation_id` successfully with the server's reply.
    pub(crate) fn confirm(
        &mut self,
        operation_id: OperationId,
        confirmation: Confirmation<D::Payload>,
        pass: &mut ReconcilePass,
    ) {
        let Some(resolved) = self.ledger.resolve(operation_id, Settlement::Confirmed) else {
            tracing::debug!(store = D::NAME, operation = %operation_id, "confirmation for settled operation ignored");
            return;
        };
        let target = resolved.entity_id().to_string();
        let Confirmation {
            primary,
            side_effects,
        } = confirmation;

        if primary.entity_id == target {
            self.write_authoritative(primary, pass);
        } else {
            // Server assigned its own id: drop the client-keyed record and
            // treat the reply like any other remote change to the new id.
            tracing::debug!(store = D::NAME, from = %target, to = %primary.entity_id, "re-keying confirmed entity");
            if self.entities.remove(&target).is_some() {
                pass.touch(target.as_str());
            }
            self.forget(&target);
            self.route_from(primary, Source::Server, pass);
        }

        for event in side_effects {
            self.route_from(event, Source::Server, pass);
        }
        self.drain_buffered(&target, pass);
    }

    /// Settle `operation_id` as failed: restore the value it replaced.
    pub(crate) fn roll_back(&mut self, operation_id: OperationId, pass: &mut ReconcilePass) {
        let Some(Resolved::Failed {
            entity_id,
            snapshot,
            ..
        }) = self.ledger.resolve(operation_id, Settlement::Failed)
        else {
            return;
        };

        match snapshot {
            Some(record) => {
                self.entities.upsert(record);
            }
            None => {
                self.entities.remove(&entity_id);
                self.forget(&entity_id);
            }
        }
        pass.touch(entity_id.as_str());
        self.drain_buffered(&entity_id, pass);
    }

    /// Apply a change pushed over realtime, or hold it back if a local
    /// mutation on the entity (or on the entity it aliases) has not settled
    /// yet.
    pub(crate) fn route(
        &mut self,
        event: RemoteEvent<D::Payload>,
        pass: &mut ReconcilePass,
    ) -> RealtimeOutcome {
        self.route_from(event, Source::Pushed, pass)
    }

    /// Reconcile a full authoritative fetch issued at `fetched_at`.
    ///
    /// Entities missing from the fetch are removed only if nothing wrote
    /// them after `fetched_at`: a record confirmed or pushed while the fetch
    /// was in flight is newer than the fetch.
    pub(crate) fn refresh_from(
        &mut self,
        records: Vec<ServerRecord<D::Payload>>,
        fetched_at: u64,
        pass: &mut ReconcilePass,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();
        let on_server: HashSet<EntityId> = records.iter().map(|r| r.id.clone()).collect();
        self.merge_records(records, &mut report, pass);

        let vanished: Vec<EntityId> = self
            .entities
            .records()
            .iter()
            .filter(|(id, record)| {
                !on_server.contains(*id)
                    && D::swept_by_refresh(&record.payload)
                    && !self.ledger.has_pending(id)
                    && self.unchanged_since(id, fetched_at)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in vanished {
            self.entities.remove(&id);
            self.forget(&id);
            pass.touch(id);
            report.removed += 1;
        }

        report
    }

    /// Merge one page of older records. Nothing is removed.
    pub(crate) fn merge_page(
        &mut self,
        records: Vec<ServerRecord<D::Payload>>,
        pass: &mut ReconcilePass,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();
        self.merge_records(records, &mut report, pass);
        report
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn merge_records(
        &mut self,
        records: Vec<ServerRecord<D::Payload>>,
        report: &mut RefreshReport,
        pass: &mut ReconcilePass,
    ) {
        for record in records {
            let event: RemoteEvent<D::Payload> = record.into();

            if let Some(holder) = self.pending_holder(&event) {
                self.buffered
                    .entry(holder)
                    .or_default()
                    .push((event, Source::Server));
                report.deferred += 1;
                continue;
            }

            // Equal sequences are accepted so restored records become
            // confirmed without a version bump.
            if event.sequence < self.window_for(&event.entity_id).high_water() {
                report.stale += 1;
                continue;
            }
            self.write_authoritative(event, pass);
            report.applied += 1;
        }
    }

    /// Entity whose pending mutation must settle before `event` may apply.
    fn pending_holder(&self, event: &RemoteEvent<D::Payload>) -> Option<EntityId> {
        if self.ledger.has_pending(&event.entity_id) {
            return Some(event.entity_id.clone());
        }
        event
            .payload()
            .and_then(D::pending_alias)
            .filter(|alias| self.ledger.has_pending(alias))
    }

    fn route_from(
        &mut self,
        event: RemoteEvent<D::Payload>,
        source: Source,
        pass: &mut ReconcilePass,
    ) -> RealtimeOutcome {
        if let Some(holder) = self.pending_holder(&event) {
            tracing::debug!(store = D::NAME, entity_id = %event.entity_id, held_by = %holder, sequence = event.sequence, "buffering remote change");
            self.buffered.entry(holder).or_default().push((event, source));
            return RealtimeOutcome::Buffered;
        }
        self.apply_checked(event, source, pass)
    }

    fn apply_checked(
        &mut self,
        event: RemoteEvent<D::Payload>,
        source: Source,
        pass: &mut ReconcilePass,
    ) -> RealtimeOutcome {
        if let Err(stale) = self
            .window_for(&event.entity_id)
            .admit(&event.entity_id, event.sequence)
        {
            tracing::trace!(store = D::NAME, %stale, "dropping stale remote change");
            return RealtimeOutcome::Stale;
        }
        let event = match source {
            Source::Pushed => self.merge_pushed(event),
            Source::Server => event,
        };
        self.write(event, pass);
        RealtimeOutcome::Applied
    }

    fn merge_pushed(&self, event: RemoteEvent<D::Payload>) -> RemoteEvent<D::Payload> {
        let RemoteEvent {
            entity_id,
            change,
            sequence,
        } = event;
        let change = match change {
            RemoteChange::Put(pushed) => {
                let current = self.entities.get(&entity_id).map(|r| &r.payload);
                RemoteChange::Put(D::merge_pushed(current, pushed))
            }
            RemoteChange::Delete => RemoteChange::Delete,
        };
        RemoteEvent {
            entity_id,
            change,
            sequence,
        }
    }

    fn write_authoritative(&mut self, event: RemoteEvent<D::Payload>, pass: &mut ReconcilePass) {
        self.window_for(&event.entity_id).advance(event.sequence);
        self.write(event, pass);
    }

    fn write(&mut self, event: RemoteEvent<D::Payload>, pass: &mut ReconcilePass) {
        let RemoteEvent {
            entity_id,
            change,
            sequence,
        } = event;
        match change {
            RemoteChange::Put(payload) => {
                let record = Record::confirmed(entity_id.as_str(), payload, sequence);
                self.stamp(&entity_id);
                if self.entities.get(&entity_id) != Some(&record) {
                    self.entities.upsert(record);
                    pass.touch(entity_id);
                }
            }
            RemoteChange::Delete => {
                self.forget(&entity_id);
                if self.entities.remove(&entity_id).is_some() {
                    pass.touch(entity_id);
                }
            }
        }
    }

    fn drain_buffered(&mut self, entity_id: &str, pass: &mut ReconcilePass) {
        let Some(events) = self.buffered.remove(entity_id) else {
            return;
        };
        for (event, source) in events {
            self.route_from(event, source, pass);
        }
    }
}
