//! Reactive layer: synchronous notifications for UI observers.
//!
//! Stores emit one [`StoreEvent`] per reconciliation pass, after releasing
//! their state lock, so a listener can read the new state from inside the
//! callback.
//!
//! - [`event`]: [`StoreEvent`] and [`ChangeCause`].
//! - [`event_emitter`]: typed pub/sub ([`EventEmitter<T>`]).

pub mod event;
pub mod event_emitter;

pub use event::{ChangeCause, StoreEvent};
pub use event_emitter::{EventEmitter, ListenerId};

/// An owned one-shot closure that removes a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;
