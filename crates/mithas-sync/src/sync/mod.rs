//! The optimistic mutation and reconciliation engine.

pub mod engine;
mod reconcile;
mod refresh;
pub mod replay;
mod state;
pub mod types;

pub use engine::{MutationHandle, SyncStore};
pub use replay::ReplayWindow;
pub use types::{
    EventCallback, Page, PageReport, RealtimeOutcome, RealtimeTransport, RefreshReport,
    RemoteCall, RemoteResult,
};
