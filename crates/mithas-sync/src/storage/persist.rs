//! PersistenceAdapter: versioned JSON snapshots of a store's confirmed
//! records.
//!
//! Format:
//! ```json
//! {"version":1,"records":[{"id":"line:P1","payload":{...},"sequence":4}]}
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::ServerRecord;

use super::traits::PersistenceBackend;

pub const PERSIST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState<P> {
    pub version: u32,
    pub records: Vec<ServerRecord<P>>,
}

/// Reads only the version so unknown formats are recognized before their
/// records are parsed.
#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Clone)]
pub struct PersistenceAdapter {
    backend: Arc<dyn PersistenceBackend>,
    key: String,
    /// Revision of the last snapshot written by `save_revision`.
    written: Arc<Mutex<u64>>,
}

impl PersistenceAdapter {
    pub fn new(backend: Arc<dyn PersistenceBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            written: Arc::new(Mutex::new(0)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted records. A missing key is an empty store.
    pub fn load<P: DeserializeOwned>(&self) -> Result<Vec<ServerRecord<P>>, StorageError> {
        let Some(raw) = self.backend.get(&self.key)? else {
            return Ok(Vec::new());
        };

        let probe: VersionProbe = serde_json::from_str(&raw).map_err(|e| self.corrupt(e))?;
        if probe.version != PERSIST_FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: self.key.clone(),
                version: probe.version,
            });
        }

        let state: PersistedState<P> = serde_json::from_str(&raw).map_err(|e| self.corrupt(e))?;
        Ok(state.records)
    }

    /// Replace the persisted records.
    pub fn save<P: Serialize>(&self, records: &[ServerRecord<P>]) -> Result<(), StorageError> {
        #[derive(Serialize)]
        struct Borrowed<'a, P> {
            version: u32,
            records: &'a [ServerRecord<P>],
        }

        let json = serde_json::to_string(&Borrowed {
            version: PERSIST_FORMAT_VERSION,
            records,
        })
        .map_err(|e| self.corrupt(e))?;
        self.backend.set(&self.key, &json)
    }

    /// Replace the persisted records with the snapshot taken at `revision`,
    /// unless a later revision has already been written. Writes are
    /// serialized, so snapshots reach the backend in revision order.
    /// Returns whether the snapshot was written.
    pub fn save_revision<P: Serialize>(
        &self,
        revision: u64,
        records: &[ServerRecord<P>],
    ) -> Result<bool, StorageError> {
        let mut written = self.written.lock();
        if revision <= *written {
            return Ok(false);
        }
        self.save(records)?;
        *written = revision;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.remove(&self.key)
    }

    fn corrupt(&self, e: serde_json::Error) -> StorageError {
        StorageError::Corrupt {
            key: self.key.clone(),
            message: e.to_string(),
        }
    }
}
