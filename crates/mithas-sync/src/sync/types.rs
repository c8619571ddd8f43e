//! Sync-specific types: the remote and realtime boundaries, and the reports
//! produced by reconciliation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Domain;
use crate::error::RemoteError;
use crate::reactive::Unsubscribe;
use crate::types::{Confirmation, RemoteEvent, ServerRecord};

// ============================================================================
// RemoteCall: user-provided network layer
// ============================================================================

/// Result type of every remote API call.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The remote authority for one domain.
///
/// Each domain module defines an API trait with one async fn per mutation
/// kind (`CartApi::add_item`, `WalletApi::pay`, ...) and a blanket
/// `impl<T: CartApi> RemoteCall<Cart> for T`, so a network client only
/// implements the per-kind trait. Test doubles may implement `RemoteCall`
/// directly instead (but not both).
#[async_trait]
pub trait RemoteCall<D: Domain>: Send + Sync {
    /// Make `intent` durable. The reply is authoritative and replaces the
    /// optimistic value.
    async fn commit(&self, intent: &D::Intent) -> RemoteResult<Confirmation<D::Payload>>;

    /// Every record the authority currently holds for this store, except
    /// history it only serves in pages (see [`Domain::swept_by_refresh`]).
    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<D::Payload>>>;

    /// One page of older history, numbered from 1. The first page is the
    /// one `fetch` already includes. Stores without paged history have none.
    async fn fetch_page(&self, _page: u32) -> RemoteResult<Page<D::Payload>> {
        Ok(Page::last(Vec::new()))
    }
}

/// One page of history served by [`RemoteCall::fetch_page`].
#[derive(Debug, Clone, PartialEq)]
pub struct Page<P> {
    pub records: Vec<ServerRecord<P>>,
    pub has_more: bool,
}

impl<P> Page<P> {
    pub fn new(records: Vec<ServerRecord<P>>, has_more: bool) -> Self {
        Self { records, has_more }
    }

    pub fn last(records: Vec<ServerRecord<P>>) -> Self {
        Self::new(records, false)
    }
}

// ============================================================================
// RealtimeTransport: user-provided push channel
// ============================================================================

/// Callback invoked by the transport for each pushed event.
pub type EventCallback<P> = Arc<dyn Fn(RemoteEvent<P>) + Send + Sync>;

/// Push channel delivering remote-confirmed changes made by other clients.
pub trait RealtimeTransport<P>: Send + Sync {
    /// Start delivering events for `channel_key` to `on_event` until the
    /// returned closure is called.
    fn subscribe(&self, channel_key: &str, on_event: EventCallback<P>) -> Unsubscribe;
}

// ============================================================================
// Reports
// ============================================================================

/// What happened to one inbound realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeOutcome {
    Applied,
    /// Held until the pending mutation on the entity settles.
    Buffered,
    /// Already seen, or older than the held sequence. Dropped.
    Stale,
}

/// Result of merging one page of history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReport {
    pub page: u32,
    pub report: RefreshReport,
    /// Whether the authority has pages after this one.
    pub has_more: bool,
}

/// Aggregated result of a refresh against the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Records written from the fetch.
    pub applied: usize,
    /// Local records the authority no longer has.
    pub removed: usize,
    /// Records held back because their entity has a mutation in flight.
    pub deferred: usize,
    /// Records older than what the store already holds.
    pub stale: usize,
}
