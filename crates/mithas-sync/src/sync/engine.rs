//! SyncStore<D>: the optimistic mutation engine for one domain.
//!
//! `dispatch` validates an intent, takes the entity's turn and, when the turn
//! is free, applies the optimistic value before returning. The remote call
//! and the reconciliation that follows run on a spawned task; the returned
//! [`MutationHandle`] resolves once that task has reconciled the outcome.
//!
//! All state lives behind one `parking_lot::Mutex`. It is never held across
//! an `.await`, and observers are notified after it is released.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::StoreOptions;
use crate::domain::Domain;
use crate::entity::Snapshot;
use crate::error::{Result, SyncError};
use crate::ledger::{EntityTurns, Turn};
use crate::reactive::{ChangeCause, EventEmitter, StoreEvent, Unsubscribe};
use crate::storage::{PersistenceAdapter, PersistenceBackend};
use crate::types::{Confirmation, EntityId, OperationId, Record, RemoteEvent};

use super::reconcile::ReconcilePass;
use super::refresh::RefreshScheduler;
use super::state::StoreState;
use super::types::{PageReport, RealtimeOutcome, RealtimeTransport, RefreshReport, RemoteCall};

/// Cheap to clone; every clone drives the same store.
pub struct SyncStore<D: Domain> {
    shared: Arc<Shared<D>>,
}

impl<D: Domain> Clone for SyncStore<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<D: Domain> {
    state: Mutex<StoreState<D>>,
    turns: EntityTurns,
    emitter: EventEmitter<StoreEvent>,
    remote: Arc<dyn RemoteCall<D>>,
    persistence: Option<PersistenceAdapter>,
    options: StoreOptions,
    refresh: RefreshScheduler,
}

impl<D: Domain> SyncStore<D> {
    /// Build a store and restore its persisted state.
    ///
    /// Persistence is enabled when both `backend` and `options.persist_key`
    /// are set. Unreadable persisted state is logged and ignored.
    pub fn new(
        remote: Arc<dyn RemoteCall<D>>,
        options: StoreOptions,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        let persistence = match (backend, options.persist_key.as_deref()) {
            (Some(backend), Some(key)) => Some(PersistenceAdapter::new(backend, key)),
            _ => None,
        };

        let mut state = StoreState::new(options.replay_window);
        if let Some(adapter) = &persistence {
            match adapter.load::<D::Payload>() {
                Ok(records) => {
                    tracing::debug!(store = D::NAME, key = adapter.key(), count = records.len(), "restored persisted state");
                    state.restore(records);
                }
                Err(e) => {
                    tracing::warn!(store = D::NAME, error = %e, "discarding unreadable persisted state");
                }
            }
        }

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                turns: EntityTurns::new(D::NAME),
                emitter: EventEmitter::new(),
                remote,
                refresh: RefreshScheduler::new(D::NAME, options.refresh_throttle()),
                persistence,
                options,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        D::NAME
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Immutable copy of every record and the aggregates.
    pub fn state(&self) -> Snapshot<D> {
        self.shared.state.lock().snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Record<D::Payload>> {
        self.shared.state.lock().entities.get(id).cloned()
    }

    pub fn aggregates(&self) -> D::Aggregates {
        self.shared.state.lock().entities.aggregates().clone()
    }

    pub fn has_pending(&self, entity_id: &str) -> bool {
        self.shared.state.lock().ledger.has_pending(entity_id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().ledger.len()
    }

    /// Call `listener` after every pass that changed the store.
    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.shared.emitter.on(listener);
        let shared = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.emitter.off(id);
            }
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Apply `intent` optimistically and make it durable remotely.
    ///
    /// Fails synchronously, with nothing applied, on validation errors and
    /// (under [`ConflictPolicy::Reject`](crate::config::ConflictPolicy))
    /// on conflicts. Must be called within a tokio runtime.
    pub fn dispatch(&self, intent: D::Intent) -> Result<MutationHandle<D::Payload>> {
        D::check(&intent)?;

        let entity_id = D::target(&intent);
        let mut turn = self
            .shared
            .turns
            .enter(&entity_id, self.shared.options.conflict_policy)?;

        let operation_id = if turn.is_ready() {
            Some(self.shared.begin(&intent)?)
        } else {
            tracing::debug!(store = D::NAME, entity_id = %entity_id, "queued behind in-flight mutation");
            None
        };

        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = shared.run(intent, turn, operation_id).await;
            // The caller may have dropped the handle; the store is already
            // reconciled either way.
            let _ = tx.send(result);
        });

        Ok(MutationHandle {
            store: D::NAME,
            entity_id,
            operation_id,
            rx,
        })
    }

    // -----------------------------------------------------------------------
    // Remote-origin changes
    // -----------------------------------------------------------------------

    /// Feed one realtime event into the store.
    pub fn apply_realtime(&self, event: RemoteEvent<D::Payload>) -> RealtimeOutcome {
        self.shared.apply_realtime(event)
    }

    /// Route events pushed on `channel_key` into this store until the
    /// returned closure is called. The transport only holds a weak
    /// reference to the store.
    pub fn subscribe_realtime(
        &self,
        transport: &dyn RealtimeTransport<D::Payload>,
        channel_key: &str,
    ) -> Unsubscribe {
        let shared: Weak<Shared<D>> = Arc::downgrade(&self.shared);
        transport.subscribe(
            channel_key,
            Arc::new(move |event: RemoteEvent<D::Payload>| {
                if let Some(shared) = shared.upgrade() {
                    shared.apply_realtime(event);
                }
            }),
        )
    }

    /// Re-synchronize with the full authoritative set. Concurrent calls are
    /// coalesced into one follow-up refresh.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .refresh
            .schedule(move || {
                let shared = Arc::clone(&shared);
                async move { shared.refresh_now().await }
            })
            .await
    }

    /// Fetch page `page` of older history and merge it. Unlike a refresh,
    /// records the page does not mention are left alone.
    pub async fn load_page(&self, page: u32) -> Result<PageReport> {
        let limit = self.shared.options.remote_timeout();
        let fetched = match tokio::time::timeout(limit, self.shared.remote.fetch_page(page)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                tracing::warn!(store = D::NAME, page, error = %e, "page fetch failed");
                return Err(e.into_sync_error(D::NAME, "*"));
            }
            Err(_) => {
                tracing::warn!(store = D::NAME, page, "page fetch timed out");
                return Err(SyncError::Timeout {
                    store: D::NAME,
                    entity_id: "*".to_string(),
                    after_ms: self.shared.options.remote_timeout_ms,
                });
            }
        };

        let has_more = fetched.has_more;
        let report = self.shared.settle(ChangeCause::Refreshed, |state, pass| {
            state.merge_page(fetched.records, pass)
        });
        tracing::debug!(store = D::NAME, page, applied = report.applied, has_more, "page merged");
        Ok(PageReport {
            page,
            report,
            has_more,
        })
    }
}

impl<D: Domain> Shared<D> {
    fn begin(&self, intent: &D::Intent) -> Result<OperationId> {
        let mut pass = ReconcilePass::new(ChangeCause::Optimistic);
        let operation_id = {
            let mut state = self.state.lock();
            state.begin_optimistic(intent, &mut pass)?
        };
        tracing::debug!(store = D::NAME, entity_id = %D::target(intent), operation = %operation_id, "applied optimistic mutation");
        self.notify(pass);
        Ok(operation_id)
    }

    async fn run(
        self: Arc<Self>,
        intent: D::Intent,
        mut turn: Turn,
        operation_id: Option<OperationId>,
    ) -> Result<Option<Record<D::Payload>>> {
        let operation_id = match operation_id {
            Some(id) => id,
            None => {
                turn.wait().await;
                self.begin(&intent)?
            }
        };

        let result = match self.call_remote(&intent, turn.entity_id()).await {
            Ok(confirmation) => {
                let primary = confirmation.primary.entity_id.clone();
                self.settle(ChangeCause::Confirmed, |state, pass| {
                    state.confirm(operation_id, confirmation, pass)
                });
                tracing::debug!(store = D::NAME, entity_id = %primary, operation = %operation_id, "mutation confirmed");
                let record = self.state.lock().entities.get(&primary).cloned();
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(store = D::NAME, entity_id = %turn.entity_id(), operation = %operation_id, error = %e, "mutation failed; rolled back");
                self.settle(ChangeCause::RolledBack, |state, pass| {
                    state.roll_back(operation_id, pass)
                });
                Err(e)
            }
        };

        // The next mutation on this entity starts from the settled state.
        drop(turn);
        result
    }

    async fn call_remote(
        &self,
        intent: &D::Intent,
        entity_id: &str,
    ) -> Result<Confirmation<D::Payload>> {
        let limit = self.options.remote_timeout();
        match tokio::time::timeout(limit, self.remote.commit(intent)).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(e)) => Err(e.into_sync_error(D::NAME, entity_id)),
            Err(_) => Err(SyncError::Timeout {
                store: D::NAME,
                entity_id: entity_id.to_string(),
                after_ms: self.options.remote_timeout_ms,
            }),
        }
    }

    fn apply_realtime(&self, event: RemoteEvent<D::Payload>) -> RealtimeOutcome {
        self.settle(ChangeCause::Realtime, |state, pass| state.route(event, pass))
    }

    async fn refresh_now(&self) -> Result<RefreshReport> {
        let limit = self.options.remote_timeout();
        let fetched_at = self.state.lock().epoch();
        let records = match tokio::time::timeout(limit, self.remote.fetch()).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                tracing::warn!(store = D::NAME, error = %e, "refresh failed");
                return Err(e.into_sync_error(D::NAME, "*"));
            }
            Err(_) => {
                tracing::warn!(store = D::NAME, "refresh timed out");
                return Err(SyncError::Timeout {
                    store: D::NAME,
                    entity_id: "*".to_string(),
                    after_ms: self.options.remote_timeout_ms,
                });
            }
        };

        let report = self.settle(ChangeCause::Refreshed, |state, pass| {
            state.refresh_from(records, fetched_at, pass)
        });
        tracing::debug!(store = D::NAME, applied = report.applied, removed = report.removed, deferred = report.deferred, stale = report.stale, "refresh reconciled");
        Ok(report)
    }

    /// Run one reconciliation pass under the lock, then persist and notify
    /// outside it. Snapshots are revisioned under the lock, so a pass that
    /// saves late never overwrites a newer snapshot.
    fn settle<T>(
        &self,
        cause: ChangeCause,
        f: impl FnOnce(&mut StoreState<D>, &mut ReconcilePass) -> T,
    ) -> T {
        let mut pass = ReconcilePass::new(cause);
        let (out, snapshot) = {
            let mut state = self.state.lock();
            let out = f(&mut *state, &mut pass);
            let snapshot = match &self.persistence {
                Some(_) if !pass.is_empty() => Some(state.persist_snapshot()),
                _ => None,
            };
            (out, snapshot)
        };

        if let (Some(adapter), Some((revision, subset))) = (&self.persistence, snapshot) {
            match adapter.save_revision(revision, &subset) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(store = D::NAME, revision, "newer snapshot already persisted");
                }
                Err(e) => {
                    tracing::warn!(store = D::NAME, error = %e, "failed to persist store state");
                }
            }
        }
        self.notify(pass);
        out
    }

    fn notify(&self, pass: ReconcilePass) {
        if let Some(event) = pass.into_event(D::NAME) {
            self.emitter.emit(&event);
        }
    }
}

// ============================================================================
// MutationHandle
// ============================================================================

/// Resolves after the mutation's outcome has been reconciled: to the
/// authoritative record (`None` if the server removed it), or to the error
/// that caused the rollback.
///
/// Dropping the handle does not cancel the mutation.
#[must_use = "a dispatched mutation reports its outcome through the handle"]
pub struct MutationHandle<P> {
    store: &'static str,
    entity_id: EntityId,
    operation_id: Option<OperationId>,
    rx: oneshot::Receiver<Result<Option<Record<P>>>>,
}

impl<P> MutationHandle<P> {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Ledger id of the operation, or `None` if the mutation was queued
    /// behind another one on the same entity when it was dispatched.
    pub fn operation_id(&self) -> Option<OperationId> {
        self.operation_id
    }
}

impl<P> Unpin for MutationHandle<P> {}

impl<P> Future for MutationHandle<P> {
    type Output = Result<Option<Record<P>>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SyncError::Disposed(this.store))),
            Poll::Pending => Poll::Pending,
        }
    }
}
