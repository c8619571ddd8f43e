//! Persistence of the confirmed subset of a store across restarts.

pub mod file;
pub mod memory;
pub mod persist;
pub mod traits;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use persist::{PersistedState, PersistenceAdapter, PERSIST_FORMAT_VERSION};
pub use traits::PersistenceBackend;
