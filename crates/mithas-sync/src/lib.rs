//! Optimistic client-state synchronization.
//!
//! Every store applies local intent immediately, records the mutation in a
//! pending ledger, issues the remote call, and reconciles the reply (or a
//! realtime push from another client) against local state. See
//! [`sync::SyncStore`] for the engine and [`domain`] for the cart, wallet,
//! reels and chat adapters built on it.

pub mod config;
pub mod context;
pub mod domain;
pub mod entity;
pub mod error;
pub mod ledger;
pub mod reactive;
pub mod storage;
pub mod sync;
pub mod types;

pub use context::{AppStores, RefreshAll, Remotes};
pub use error::{Result, SyncError};
pub use sync::{MutationHandle, SyncStore};
