use crate::error::StorageError;

/// Key/value storage for serialized store state.
///
/// Implementations must be safe to share between stores; each store uses
/// its own key.
pub trait PersistenceBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
