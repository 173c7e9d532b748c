//! Frame codec for the trust log.
//!
//! ```text
//! header: [b"MCTL"][version: u8]
//! frame:  [len: u32 LE][json TrustLogEntry: len bytes][crc32(json): u32 LE]
//! ```

use std::io::{self, Read, Write};

use thiserror::Error;

use super::TrustLogEntry;

/// Log format version written after the magic.
pub const LOG_VERSION: u8 = 1;

/// Magic bytes opening every trust log.
pub const MAGIC: [u8; 4] = *b"MCTL";

/// Header length in bytes.
pub const HEADER_LEN: u64 = 5;

/// Trust log entries are small; anything larger is a damaged length prefix.
const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Why a frame could not be read.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The file ended inside a frame (interrupted append).
    #[error("frame truncated")]
    Truncated,

    /// The frame is complete but its contents are unusable.
    #[error("frame corrupted: {0}")]
    Corrupt(String),

    /// Reading failed for a reason other than end of file.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Returns true for a torn tail rather than damaged data.
    #[must_use]
    pub const fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated)
    }
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), FrameError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })
}

/// Encodes one log entry as a checksummed frame.
///
/// # Errors
///
/// Returns `FrameError::Corrupt` if the entry cannot be serialized or is too large.
pub fn encode_entry(entry: &TrustLogEntry) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(entry).map_err(|e| FrameError::Corrupt(e.to_string()))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| FrameError::Corrupt(format!("entry of {} bytes is too large", body.len())))?;

    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(frame)
}

/// Decodes the next frame.
///
/// # Errors
///
/// `Truncated` when the reader ends mid-frame, `Corrupt` on a bad length,
/// checksum mismatch or undecodable body.
pub fn decode_entry(reader: &mut impl Read) -> Result<TrustLogEntry, FrameError> {
    let mut len = [0u8; 4];
    read_fully(reader, &mut len)?;
    let len = u32::from_le_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Corrupt(format!("length prefix {len} exceeds {MAX_FRAME_LEN}")));
    }

    let mut body = vec![0u8; len as usize];
    read_fully(reader, &mut body)?;
    let mut crc = [0u8; 4];
    read_fully(reader, &mut crc)?;

    let stored = u32::from_le_bytes(crc);
    let computed = crc32fast::hash(&body);
    if stored != computed {
        return Err(FrameError::Corrupt(format!(
            "checksum mismatch: stored={stored:08x} computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&body).map_err(|e| FrameError::Corrupt(e.to_string()))
}

/// Writes the log header.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[LOG_VERSION])
}

/// Reads and checks the log header.
///
/// # Errors
///
/// `Corrupt` for a foreign magic or an unsupported version.
pub fn check_header(reader: &mut impl Read) -> Result<(), FrameError> {
    let mut header = [0u8; 5];
    read_fully(reader, &mut header)?;
    if header[..4] != MAGIC {
        return Err(FrameError::Corrupt("not a trust log".to_string()));
    }
    if header[4] != LOG_VERSION {
        return Err(FrameError::Corrupt(format!("unsupported trust log version {}", header[4])));
    }
    Ok(())
}
