//! Abstract storage traits for source trust persistence.
//!
//! Trust weights are the only state that outlives a reconciliation run. A
//! store keeps the latest record per host plus an append-only audit trail;
//! both are written together so a record never changes without its audit entry.

use thiserror::Error;

use crate::trust::{SourceTrustRecord, TrustAuditEntry};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A persisted entry failed its integrity check.
    #[error("Corrupted entry after sequence {after_sequence}: {reason}")]
    Corrupted {
        /// Last sequence number that decoded cleanly.
        after_sequence: u64,
        /// What failed.
        reason: String,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Persistence for source trust records and their audit log.
///
/// # Safety Considerations
/// - `apply_update` must persist the record and its audit entry atomically
/// - Implementations should handle concurrent access safely
pub trait TrustStore: Send + Sync {
    /// Load the latest record per host.
    fn load_records(&self) -> Result<Vec<SourceTrustRecord>, StorageError>;

    /// Load the full audit log, oldest first.
    fn load_audit(&self) -> Result<Vec<TrustAuditEntry>, StorageError>;

    /// Persist a new record state together with the audit entry describing the change.
    fn apply_update(
        &self,
        record: &SourceTrustRecord,
        entry: &TrustAuditEntry,
    ) -> Result<(), StorageError>;
}
