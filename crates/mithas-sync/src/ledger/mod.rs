//! Pending operation ledger and per-entity admission.
//!
//! - [`pending`]: [`Ledger`], one in-flight operation per entity, with the
//!   snapshot needed to roll it back.
//! - [`turns`]: [`EntityTurns`], a FIFO queue (or rejection) for mutations
//!   that target an entity which already has one in flight.

pub mod pending;
pub mod turns;

pub use pending::{Ledger, PendingOperation, Resolved, Settlement};
pub use turns::{EntityTurns, Turn};
