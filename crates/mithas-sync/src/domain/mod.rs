//! Domain adapters.
//!
//! A [`Domain`] describes one store: its payload type, the closed set of
//! intents it accepts, how an intent changes the current value, and which
//! aggregates the UI derives from the records. The engine in
//! [`crate::sync`] is generic over it; the four application stores live in
//! the submodules.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ValidationError;
use crate::types::{EntityId, MutationKind, Record};

pub mod cart;
pub mod chat;
pub mod reels;
pub mod wallet;

pub use cart::{Cart, CartStore};
pub use chat::{Chat, ChatStore};
pub use reels::{Reels, ReelsStore};
pub use wallet::{Wallet, WalletStore};

pub trait Domain: Send + Sync + 'static {
    type Payload: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Closed set of local mutations. Each variant carries exactly what the
    /// optimistic write and the remote call need.
    type Intent: fmt::Debug + Send + Sync + 'static;
    type Aggregates: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Store name used in errors, events and logs.
    const NAME: &'static str;

    /// Entity the intent mutates.
    fn target(intent: &Self::Intent) -> EntityId;

    fn kind(intent: &Self::Intent, current: Option<&Self::Payload>) -> MutationKind;

    /// Validation that needs no store state (negative quantities, empty
    /// content, ...). Runs before the intent is queued.
    fn check(intent: &Self::Intent) -> Result<(), ValidationError>;

    /// Compute the optimistic value from the current one. `Ok(None)` removes
    /// the entity. Validation that depends on state (e.g. spending more than
    /// the known balance) fails here, before anything is written.
    fn apply(
        intent: &Self::Intent,
        current: Option<&Self::Payload>,
    ) -> Result<Option<Self::Payload>, ValidationError>;

    fn aggregate(records: &BTreeMap<EntityId, Record<Self::Payload>>) -> Self::Aggregates;

    /// Local entity an incoming remote payload answers for, when the server
    /// echoes a client-generated id. Events naming a pending alias are held
    /// until that entity's mutation settles.
    fn pending_alias(_payload: &Self::Payload) -> Option<EntityId> {
        None
    }

    /// Combine a payload pushed over realtime with the local value when it
    /// is written. Pushes go to every viewer, so per-viewer fields the push
    /// cannot know (whether this user liked a reel) come from `current`.
    fn merge_pushed(_current: Option<&Self::Payload>, pushed: Self::Payload) -> Self::Payload {
        pushed
    }

    /// Whether a full fetch lists every entity like this one. Entities the
    /// fetch only returns a recent page of (transaction history, message
    /// backlog) are kept when a refresh does not mention them.
    fn swept_by_refresh(_payload: &Self::Payload) -> bool {
        true
    }
}
