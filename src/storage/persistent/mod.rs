//! Durable trust store.
//!
//! Every trust mutation is appended to a single log file as one checksummed
//! frame holding the new record and its audit entry. Opening the store
//! replays the log and truncates a torn or corrupted tail back to the last
//! valid frame.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded TrustLogEntry]
//! [ENTRY 2: codec-encoded TrustLogEntry]
//! ...
//! ```

mod codec;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::source::SourceHost;
use crate::trust::{SourceTrustRecord, TrustAuditEntry};

use super::traits::{StorageError, TrustStore};

/// A single entry in the trust log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLogEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// Record state after the mutation.
    pub record: SourceTrustRecord,
    /// Audit entry describing the mutation.
    pub audit: TrustAuditEntry,
}

/// Append-only, checksummed trust store.
///
/// Thread-safe via internal mutex.
pub struct FileTrustStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    current_sequence: Mutex<u64>,
    sync_on_write: bool,
}

impl FileTrustStore {
    /// Open or create a trust log.
    ///
    /// If the file exists, reads the last valid sequence number.
    /// If it doesn't, creates it with the header.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the file cannot be created or opened, and
    /// `StorageError::Corrupted` if an existing file is not a trust log.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let exists = path.exists() && std::fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let current_sequence = if exists {
            let replayed = replay(path)?;
            if replayed.valid_len < std::fs::metadata(path)?.len() {
                warn!(
                    path = %path.display(),
                    valid_len = replayed.valid_len,
                    "Truncating trust log to its last valid entry"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(replayed.valid_len)?;
            }
            replayed.last_sequence
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            current_sequence: Mutex::new(current_sequence),
            sync_on_write,
        })
    }

    /// Sequence number of the last appended entry.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        *self
            .current_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrustStore for FileTrustStore {
    fn load_records(&self) -> Result<Vec<SourceTrustRecord>, StorageError> {
        Ok(replay(&self.path)?.records.into_values().collect())
    }

    fn load_audit(&self) -> Result<Vec<TrustAuditEntry>, StorageError> {
        Ok(replay(&self.path)?.audit)
    }

    fn apply_update(
        &self,
        record: &SourceTrustRecord,
        entry: &TrustAuditEntry,
    ) -> Result<(), StorageError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seq = self
            .current_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let candidate = *seq + 1;
        let frame = codec::encode_entry(&TrustLogEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            record: record.clone(),
            audit: entry.clone(),
        })
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

        writer.write_all(&frame)?;
        writer.flush()?;
        if self.sync_on_write {
            writer.get_ref().sync_all()?;
        }

        *seq = candidate;
        Ok(())
    }
}

struct Replayed {
    records: BTreeMap<SourceHost, SourceTrustRecord>,
    audit: Vec<TrustAuditEntry>,
    last_sequence: u64,
    valid_len: u64,
}

fn replay(path: &Path) -> Result<Replayed, StorageError> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::check_header(&mut reader).map_err(|e| StorageError::Corrupted {
        after_sequence: 0,
        reason: e.to_string(),
    })?;

    let mut out = Replayed {
        records: BTreeMap::new(),
        audit: Vec::new(),
        last_sequence: 0,
        valid_len: reader.stream_position()?,
    };

    while reader.stream_position()? < file_size {
        match codec::decode_entry(&mut reader) {
            Ok(entry) if entry.sequence != out.last_sequence + 1 => {
                warn!(
                    path = %path.display(),
                    expected = out.last_sequence + 1,
                    found = entry.sequence,
                    "Trust log sequence gap, replaying up to the last valid entry"
                );
                break;
            }
            Ok(entry) => {
                out.last_sequence = entry.sequence;
                out.records.insert(entry.record.host.clone(), entry.record);
                out.audit.push(entry.audit);
                out.valid_len = reader.stream_position()?;
            }
            Err(e) if e.is_truncation() => {
                warn!(path = %path.display(), after = out.last_sequence, "Trust log has a torn tail");
                break;
            }
            Err(codec::FrameError::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    after = out.last_sequence,
                    error = %e,
                    "Trust log corruption detected, replaying up to the last valid entry"
                );
                break;
            }
        }
    }

    Ok(out)
}
