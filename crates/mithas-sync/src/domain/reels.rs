//! Reels engagement: like counters per reel.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::StoreOptions;
use crate::error::{Result, ValidationError};
use crate::storage::PersistenceBackend;
use crate::sync::{MutationHandle, RemoteCall, RemoteResult, SyncStore};
use crate::types::{Confirmation, EntityId, MutationKind, Record, ServerRecord};

use super::Domain;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelStats {
    pub likes_count: u64,
    pub comments_count: u64,
    pub shares_count: u64,
    pub views_count: u64,
    /// Whether the current user likes the reel.
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReelsIntent {
    Like { reel_id: EntityId },
    Unlike { reel_id: EntityId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReelsSummary {
    pub reel_count: usize,
    pub liked_count: usize,
}

pub struct Reels;

impl Domain for Reels {
    type Payload = ReelStats;
    type Intent = ReelsIntent;
    type Aggregates = ReelsSummary;

    const NAME: &'static str = "reels";

    fn target(intent: &ReelsIntent) -> EntityId {
        match intent {
            ReelsIntent::Like { reel_id } | ReelsIntent::Unlike { reel_id } => reel_id.clone(),
        }
    }

    fn kind(_: &ReelsIntent, _: Option<&ReelStats>) -> MutationKind {
        MutationKind::Update
    }

    fn check(intent: &ReelsIntent) -> std::result::Result<(), ValidationError> {
        if Self::target(intent).is_empty() {
            return Err(ValidationError::new("reel_id", "a reel id", "\"\""));
        }
        Ok(())
    }

    fn apply(
        intent: &ReelsIntent,
        current: Option<&ReelStats>,
    ) -> std::result::Result<Option<ReelStats>, ValidationError> {
        let Some(stats) = current else {
            return Err(ValidationError::new(
                "reel_id",
                "a loaded reel",
                Self::target(intent),
            ));
        };
        let like = matches!(intent, ReelsIntent::Like { .. });
        if stats.is_liked == like {
            return Err(ValidationError::new(
                "is_liked",
                if like { "a reel not yet liked" } else { "a liked reel" },
                stats.is_liked,
            ));
        }

        let mut next = stats.clone();
        next.is_liked = like;
        next.likes_count = if like {
            next.likes_count + 1
        } else {
            next.likes_count.saturating_sub(1)
        };
        Ok(Some(next))
    }

    fn aggregate(records: &BTreeMap<EntityId, Record<ReelStats>>) -> ReelsSummary {
        ReelsSummary {
            reel_count: records.len(),
            liked_count: records.values().filter(|r| r.payload.is_liked).count(),
        }
    }

    /// Pushed counters are shared by every viewer; `is_liked` stays local.
    fn merge_pushed(current: Option<&ReelStats>, pushed: ReelStats) -> ReelStats {
        match current {
            Some(current) => ReelStats {
                is_liked: current.is_liked,
                ..pushed
            },
            None => pushed,
        }
    }
}

// ============================================================================
// Remote API
// ============================================================================

#[async_trait]
pub trait ReelsApi: Send + Sync {
    /// Returns the reel's stats after the like.
    async fn like(&self, reel_id: &str) -> RemoteResult<ServerRecord<ReelStats>>;

    async fn unlike(&self, reel_id: &str) -> RemoteResult<ServerRecord<ReelStats>>;

    async fn fetch_reels(&self) -> RemoteResult<Vec<ServerRecord<ReelStats>>>;
}

#[async_trait]
impl<T: ReelsApi> RemoteCall<Reels> for T {
    async fn commit(&self, intent: &ReelsIntent) -> RemoteResult<Confirmation<ReelStats>> {
        let record = match intent {
            ReelsIntent::Like { reel_id } => self.like(reel_id).await?,
            ReelsIntent::Unlike { reel_id } => self.unlike(reel_id).await?,
        };
        Ok(Confirmation::of(record.into()))
    }

    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<ReelStats>>> {
        self.fetch_reels().await
    }
}

// ============================================================================
// ReelsStore
// ============================================================================

pub struct ReelsStore {
    store: SyncStore<Reels>,
}

impl ReelsStore {
    pub fn new(
        remote: Arc<dyn RemoteCall<Reels>>,
        options: StoreOptions,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        Self {
            store: SyncStore::new(remote, options, backend),
        }
    }

    pub fn like_reel(&self, reel_id: impl Into<EntityId>) -> Result<MutationHandle<ReelStats>> {
        self.store.dispatch(ReelsIntent::Like {
            reel_id: reel_id.into(),
        })
    }

    pub fn unlike_reel(&self, reel_id: impl Into<EntityId>) -> Result<MutationHandle<ReelStats>> {
        self.store.dispatch(ReelsIntent::Unlike {
            reel_id: reel_id.into(),
        })
    }

    pub fn stats(&self, reel_id: &str) -> Option<ReelStats> {
        self.store.get(reel_id).map(|r| r.payload)
    }
}

impl Deref for ReelsStore {
    type Target = SyncStore<Reels>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
