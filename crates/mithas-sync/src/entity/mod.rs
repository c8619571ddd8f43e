//! Entity store: the keyed records the UI renders, plus derived aggregates.

pub mod store;

pub use store::{EntityStore, Snapshot, StoreSnapshot};
