//! Source trust registry.
//!
//! Trust is modeled separately from recency and from consensus confidence.
//! A trust weight (0.0-1.0) scales how much a host's findings influence a
//! consensus. Weights change only through explicit, audited updates; unknown
//! hosts resolve to a configured default.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigurationError, ValidationError};
use crate::source::SourceHost;
use crate::storage::{StorageError, TrustStore};

/// Current trust state for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTrustRecord {
    /// The host this record applies to.
    pub host: SourceHost,
    /// Weight in [0.0, 1.0].
    pub weight: f64,
    /// When the weight last changed.
    pub last_updated: DateTime<Utc>,
    /// Why the weight last changed.
    pub updated_reason: String,
}

/// Append-only record of one trust mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAuditEntry {
    /// Host whose weight changed.
    pub host: SourceHost,
    /// Weight before the change.
    pub old_weight: f64,
    /// Weight after the change (clamped).
    pub new_weight: f64,
    /// Caller-supplied reason.
    pub reason: String,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
}

/// Trust registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Weight returned for hosts without a record.
    pub default_weight: f64,
    /// Initial weights applied to hosts that have no persisted record yet.
    pub seed: BTreeMap<String, f64>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.6,
            seed: BTreeMap::new(),
        }
    }
}

impl TrustConfig {
    /// Validates weights and hosts.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidTrust` for any weight outside [0, 1]
    /// or an empty seed host.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_unit(self.default_weight).map_err(|_| ConfigurationError::InvalidTrust {
            reason: format!("default_weight {} is outside [0, 1]", self.default_weight),
        })?;
        for (host, weight) in &self.seed {
            SourceHost::parse(host).map_err(|_| ConfigurationError::InvalidTrust {
                reason: format!("seed host '{host}' is not a valid host"),
            })?;
            check_unit(*weight).map_err(|_| ConfigurationError::InvalidTrust {
                reason: format!("seed weight {weight} for '{host}' is outside [0, 1]"),
            })?;
        }
        Ok(())
    }
}

/// Source trust interface.
///
/// Reads happen concurrently during collection; updates happen in a separate,
/// sequential pass after a run completes.
pub trait TrustRegistry: Send + Sync {
    /// Name of the registry (for audit/debugging).
    fn name(&self) -> &str;

    /// Weight in [0.0, 1.0] for a host; unknown hosts get the default.
    fn weight_for(&self, host: &SourceHost) -> f64;

    /// Nudge a host's weight by `delta`, clamped into [0.0, 1.0], and audit it.
    fn record_observed_accuracy(
        &self,
        host: &SourceHost,
        delta: f64,
        reason: &str,
    ) -> Result<TrustAuditEntry, StorageError>;

    /// Set a host's weight explicitly (clamped) and audit it.
    fn set_weight(
        &self,
        host: &SourceHost,
        weight: f64,
        reason: &str,
    ) -> Result<TrustAuditEntry, StorageError>;

    /// Snapshot of all explicit records.
    fn records(&self) -> Vec<SourceTrustRecord>;

    /// Snapshot of the audit log, oldest first.
    fn audit_log(&self) -> Vec<TrustAuditEntry>;
}

/// Trust registry backed by in-memory weights with optional write-through persistence.
///
/// Every mutation is persisted (record + audit entry) before it becomes
/// visible to readers.
pub struct InMemoryTrustRegistry {
    default_weight: f64,
    records: RwLock<HashMap<SourceHost, SourceTrustRecord>>,
    audit: RwLock<Vec<TrustAuditEntry>>,
    store: Option<Arc<dyn TrustStore>>,
}

impl std::fmt::Debug for InMemoryTrustRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTrustRegistry")
            .field("default_weight", &self.default_weight)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryTrustRegistry {
    /// Create a registry without persistence.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::WeightOutOfRange` if `default_weight` is outside [0, 1].
    pub fn new(default_weight: f64) -> Result<Self, ValidationError> {
        check_unit(default_weight)?;
        Ok(Self {
            default_weight,
            records: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
            store: None,
        })
    }

    /// Create a registry that loads from and writes through to `store`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the default weight is invalid or the
    /// store cannot be read.
    pub fn with_store(
        default_weight: f64,
        store: Arc<dyn TrustStore>,
    ) -> Result<Self, ConfigurationError> {
        check_unit(default_weight).map_err(|_| ConfigurationError::InvalidTrust {
            reason: format!("default_weight {default_weight} is outside [0, 1]"),
        })?;
        let records = store
            .load_records()?
            .into_iter()
            .map(|r| (r.host.clone(), r))
            .collect();
        let audit = store.load_audit()?;
        Ok(Self {
            default_weight,
            records: RwLock::new(records),
            audit: RwLock::new(audit),
            store: Some(store),
        })
    }

    /// Build a registry from configuration, seeding hosts that have no record yet.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for invalid configuration or an unreadable
    /// store, or if seeding cannot be persisted.
    pub fn from_config(
        config: &TrustConfig,
        store: Option<Arc<dyn TrustStore>>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let registry = match store {
            Some(store) => Self::with_store(config.default_weight, store)?,
            None => Self::new(config.default_weight).map_err(|e| ConfigurationError::InvalidTrust {
                reason: e.to_string(),
            })?,
        };
        for (raw, weight) in &config.seed {
            let host = SourceHost::parse(raw).map_err(|e| ConfigurationError::InvalidTrust {
                reason: e.to_string(),
            })?;
            if registry.record(&host).is_none() {
                registry.set_weight(&host, *weight, "configured seed")?;
            }
        }
        Ok(registry)
    }

    /// The configured default weight.
    #[must_use]
    pub const fn default_weight(&self) -> f64 {
        self.default_weight
    }

    /// Current record for a host, if any.
    #[must_use]
    pub fn record(&self, host: &SourceHost) -> Option<SourceTrustRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    fn apply(
        &self,
        host: &SourceHost,
        next: impl FnOnce(f64) -> f64,
        reason: &str,
    ) -> Result<TrustAuditEntry, StorageError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let old_weight = records
            .get(host)
            .map_or(self.default_weight, |r| r.weight);
        let new_weight = clamp_unit(next(old_weight));
        let now = Utc::now();

        let record = SourceTrustRecord {
            host: host.clone(),
            weight: new_weight,
            last_updated: now,
            updated_reason: reason.to_string(),
        };
        let entry = TrustAuditEntry {
            host: host.clone(),
            old_weight,
            new_weight,
            reason: reason.to_string(),
            timestamp: now,
        };

        if let Some(store) = &self.store {
            store.apply_update(&record, &entry)?;
        }

        debug!(host = %host, old_weight, new_weight, reason, "Trust weight updated");
        records.insert(host.clone(), record);
        self.audit
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(entry)
    }
}

impl TrustRegistry for InMemoryTrustRegistry {
    fn name(&self) -> &str {
        "in_memory_trust"
    }

    fn weight_for(&self, host: &SourceHost) -> f64 {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .map_or(self.default_weight, |r| r.weight)
    }

    fn record_observed_accuracy(
        &self,
        host: &SourceHost,
        delta: f64,
        reason: &str,
    ) -> Result<TrustAuditEntry, StorageError> {
        let delta = if delta.is_finite() { delta } else { 0.0 };
        self.apply(host, |old| old + delta, reason)
    }

    fn set_weight(
        &self,
        host: &SourceHost,
        weight: f64,
        reason: &str,
    ) -> Result<TrustAuditEntry, StorageError> {
        self.apply(host, |_| weight, reason)
    }

    fn records(&self) -> Vec<SourceTrustRecord> {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = guard.values().cloned().collect();
        out.sort_by(|a, b| a.host.cmp(&b.host));
        out
    }

    fn audit_log(&self) -> Vec<TrustAuditEntry> {
        self.audit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn check_unit(value: f64) -> Result<(), ValidationError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::WeightOutOfRange { value });
    }
    Ok(())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryTrustStore;

    fn host(s: &str) -> SourceHost {
        SourceHost::parse(s).unwrap()
    }

    #[test]
    fn unknown_host_gets_default() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        assert!((registry.weight_for(&host("example.com")) - 0.6).abs() < f64::EPSILON);
        assert!(registry.records().is_empty());
    }

    #[test]
    fn invalid_default_rejected() {
        assert!(InMemoryTrustRegistry::new(1.5).is_err());
        assert!(InMemoryTrustRegistry::new(f64::NAN).is_err());
    }

    #[test]
    fn observed_accuracy_nudges_and_audits() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let h = host("zillow.com");

        let entry = registry.record_observed_accuracy(&h, 0.1, "agreed with consensus").unwrap();
        assert!((entry.old_weight - 0.6).abs() < 1e-9);
        assert!((entry.new_weight - 0.7).abs() < 1e-9);
        assert!((registry.weight_for(&h) - 0.7).abs() < 1e-9);

        let log = registry.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, "agreed with consensus");
    }

    #[test]
    fn updates_are_clamped() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let h = host("zillow.com");

        registry.record_observed_accuracy(&h, 5.0, "up").unwrap();
        assert!((registry.weight_for(&h) - 1.0).abs() < f64::EPSILON);

        registry.record_observed_accuracy(&h, -9.0, "down").unwrap();
        assert!(registry.weight_for(&h).abs() < f64::EPSILON);

        registry.set_weight(&h, 2.0, "manual").unwrap();
        assert!((registry.weight_for(&h) - 1.0).abs() < f64::EPSILON);

        registry.record_observed_accuracy(&h, f64::NAN, "noise").unwrap();
        assert!((registry.weight_for(&h) - 1.0).abs() < f64::EPSILON);
        assert_eq!(registry.audit_log().len(), 4);
    }

    #[test]
    fn seeds_only_fill_missing_hosts() {
        let store: Arc<dyn TrustStore> = Arc::new(InMemoryTrustStore::new());
        let mut config = TrustConfig::default();
        config.seed.insert("zillow.com".to_string(), 0.95);

        let first = InMemoryTrustRegistry::from_config(&config, Some(Arc::clone(&store))).unwrap();
        first.record_observed_accuracy(&host("zillow.com"), -0.05, "drift").unwrap();

        let second = InMemoryTrustRegistry::from_config(&config, Some(store)).unwrap();
        assert!((second.weight_for(&host("zillow.com")) - 0.9).abs() < 1e-9);
        assert_eq!(second.audit_log().len(), 2);
    }

    #[test]
    fn config_validation() {
        let mut config = TrustConfig::default();
        assert!(config.validate().is_ok());
        config.seed.insert("zillow.com".to_string(), 1.2);
        assert!(config.validate().is_err());
        config.seed.clear();
        config.default_weight = -0.1;
        assert!(config.validate().is_err());
    }
}
