use std::fmt;
use std::io;

use fl_core::SnapshotError;

/// Errors produced while persisting or restoring run artifacts.
#[derive(Debug)]
pub enum StoreError {
    /// A local filesystem operation failed.
    Io { path: String, source: io::Error },

    /// A persisted JSON document is unreadable or schema-invalid.
    Malformed { path: String, source: serde_json::Error },

    /// Weight encoding or decoding failed.
    Weights(String),

    /// A decoded weight file produced an inconsistent snapshot.
    Snapshot(SnapshotError),

    /// A remote blob operation failed.
    Remote { key: String, msg: String },

    /// The HTTP client could not be constructed.
    Client(reqwest::Error),

    /// The remote store is not configured but was required.
    NoRemote,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => write!(f, "io error at {path}: {source}"),
            StoreError::Malformed { path, source } => {
                write!(f, "malformed document at {path}: {source}")
            }
            StoreError::Weights(msg) => write!(f, "weight serialization error: {msg}"),
            StoreError::Snapshot(e) => write!(f, "inconsistent snapshot: {e}"),
            StoreError::Remote { key, msg } => write!(f, "remote store error for {key}: {msg}"),
            StoreError::Client(e) => write!(f, "http client construction failed: {e}"),
            StoreError::NoRemote => write!(f, "no remote blob store configured"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Malformed { source, .. } => Some(source),
            StoreError::Snapshot(e) => Some(e),
            StoreError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> Self {
        StoreError::Snapshot(e)
    }
}
