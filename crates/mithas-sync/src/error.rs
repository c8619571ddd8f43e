use std::fmt;
use thiserror::Error;

use crate::types::{EntityId, Sequence};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A malformed intent, rejected before any optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub expected: String,
    pub received: String,
}

impl ValidationError {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        received: impl fmt::Display,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            received: received.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"Validation failed at "{}": expected {}, received {}"#,
            self.path, self.expected, self.received
        )
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// StaleEvent
// ---------------------------------------------------------------------------

/// A realtime event whose sequence was already applied or is older than the
/// one held. Internal and non-fatal: the event is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stale event for {entity_id}: sequence {sequence} is not newer than {held}")]
pub struct StaleEvent {
    pub entity_id: EntityId,
    pub sequence: Sequence,
    pub held: Sequence,
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage I/O failed for \"{key}\": {message}")]
    Io { key: String, message: String },

    #[error("Stored state under \"{key}\" is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("Stored state under \"{key}\" has unsupported format version {version}")]
    UnsupportedVersion { key: String, version: u32 },
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The remote authority declined the mutation (out of stock, insufficient
    /// funds discovered server-side, ...).
    Rejected,
    /// The call did not complete.
    Network,
}

/// Error returned by the remote API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Rejected,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Network,
        }
    }

    /// Attach store/entity context, producing the error surfaced to callers.
    pub fn into_sync_error(self, store: &'static str, entity_id: &str) -> SyncError {
        match self.kind {
            RemoteErrorKind::Rejected => SyncError::RemoteRejected {
                store,
                entity_id: entity_id.to_string(),
                reason: self.message,
            },
            RemoteErrorKind::Network => SyncError::Network {
                store,
                entity_id: entity_id.to_string(),
                message: self.message,
            },
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

// ---------------------------------------------------------------------------
// SyncError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Conflict: {store}/{entity_id} already has a mutation in flight")]
    Conflict {
        store: &'static str,
        entity_id: EntityId,
    },

    #[error("Remote rejected {store}/{entity_id}: {reason}")]
    RemoteRejected {
        store: &'static str,
        entity_id: EntityId,
        reason: String,
    },

    #[error("Network error for {store}/{entity_id}: {message}")]
    Network {
        store: &'static str,
        entity_id: EntityId,
        message: String,
    },

    #[error("Remote call for {store}/{entity_id} timed out after {after_ms}ms")]
    Timeout {
        store: &'static str,
        entity_id: EntityId,
        after_ms: u64,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Store \"{0}\" dropped the operation before it settled")]
    Disposed(&'static str),
}

impl SyncError {
    /// Whether re-dispatching the same intent as a fresh mutation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Whether the error was raised before any optimistic write happened.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Conflict { .. })
    }
}

/// Convenience alias: the default error type is `SyncError`.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
