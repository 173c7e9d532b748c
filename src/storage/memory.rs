//! In-memory trust store for tests and embedded use.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::source::SourceHost;
use crate::trust::{SourceTrustRecord, TrustAuditEntry};

use super::traits::{StorageError, TrustStore};

/// Volatile trust store backed by a map and a vector.
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    records: RwLock<BTreeMap<SourceHost, SourceTrustRecord>>,
    audit: RwLock<Vec<TrustAuditEntry>>,
}

impl InMemoryTrustStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit entries recorded so far.
    #[must_use]
    pub fn audit_len(&self) -> usize {
        self.audit.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl TrustStore for InMemoryTrustStore {
    fn load_records(&self) -> Result<Vec<SourceTrustRecord>, StorageError> {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.values().cloned().collect())
    }

    fn load_audit(&self) -> Result<Vec<TrustAuditEntry>, StorageError> {
        let guard = self.audit.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn apply_update(
        &self,
        record: &SourceTrustRecord,
        entry: &TrustAuditEntry,
    ) -> Result<(), StorageError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut audit = self.audit.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.host.clone(), record.clone());
        audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn apply_update_keeps_latest_record_and_full_audit() {
        let store = InMemoryTrustStore::new();
        let host = SourceHost::parse("zillow.com").unwrap();

        for (old, new) in [(0.6, 0.7), (0.7, 0.65)] {
            let record = SourceTrustRecord {
                host: host.clone(),
                weight: new,
                last_updated: Utc::now(),
                updated_reason: "test".to_string(),
            };
            let entry = TrustAuditEntry {
                host: host.clone(),
                old_weight: old,
                new_weight: new,
                reason: "test".to_string(),
                timestamp: Utc::now(),
            };
            store.apply_update(&record, &entry).unwrap();
        }

        let records = store.load_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].weight - 0.65).abs() < f64::EPSILON);
        assert_eq!(store.load_audit().unwrap().len(), 2);
        assert_eq!(store.audit_len(), 2);
    }
}
