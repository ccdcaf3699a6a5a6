//! Framed transaction log entries.
//!
//! Each entry is laid out as:
//!
//! ```text
//! magic (4) | version (2) | tx id (8) | length (4) | payload | crc32 (4)
//! ```
//!
//! The payload is the CBOR encoding of a
//! [`TransactionRepresentation`]. The checksum covers everything before it.
//! All integers are little-endian.

use crate::apply::TransactionRepresentation;
use crate::error::{KernelError, KernelResult};
use crate::types::TransactionId;
use crc32fast::Hasher;
use parking_lot::RwLock;

/// Magic bytes at the start of every log entry.
pub const LOG_MAGIC: [u8; 4] = *b"GTXL";

/// Current log entry format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + tx id (8) + length (4)
const HEADER_SIZE: usize = 18;

const CRC_SIZE: usize = 4;

/// Destination of appended log entries.
pub trait TransactionLogWriter: Send + Sync {
    /// Appends `bytes`, returning the offset they were written at.
    fn append(&self, bytes: &[u8]) -> KernelResult<u64>;

    /// Makes appended bytes durable.
    fn flush(&self) -> KernelResult<()>;
}

/// A log writer that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryLogWriter {
    data: RwLock<Vec<u8>>,
}

impl InMemoryLogWriter {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the log contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Size of the log in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.read().len() as u64
    }
}

impl TransactionLogWriter for InMemoryLogWriter {
    fn append(&self, bytes: &[u8]) -> KernelResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Id the transaction was committed under.
    pub tx_id: TransactionId,
    /// The committed transaction.
    pub representation: TransactionRepresentation,
}

fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes one log entry.
pub fn encode_entry(
    tx_id: TransactionId,
    representation: &TransactionRepresentation,
) -> KernelResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(representation, &mut payload)
        .map_err(|e| KernelError::codec(format!("cannot encode {tx_id}: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| KernelError::codec(format!("{tx_id} payload too large")))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.extend_from_slice(&tx_id.as_u64().to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> KernelResult<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| KernelError::log_corruption(format!("truncated entry at offset {at}")))
}

/// Decodes every entry in `bytes`.
///
/// Fails on the first malformed, truncated or corrupted entry.
pub fn decode_entries(bytes: &[u8]) -> KernelResult<Vec<LogEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let magic: [u8; 4] = read_array(bytes, offset)?;
        if magic != LOG_MAGIC {
            return Err(KernelError::log_corruption(format!(
                "bad magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes(read_array(bytes, offset + 4)?);
        if version != LOG_VERSION {
            return Err(KernelError::log_corruption(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }
        let tx_id = TransactionId::new(u64::from_le_bytes(read_array(bytes, offset + 6)?));
        let len = u32::from_le_bytes(read_array(bytes, offset + 14)?) as usize;

        let payload_start = offset + HEADER_SIZE;
        let payload_end = payload_start + len;
        let stored_crc = u32::from_le_bytes(read_array(bytes, payload_end)?);
        let actual_crc = compute_crc32(&bytes[offset..payload_end]);
        if stored_crc != actual_crc {
            return Err(KernelError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        let representation: TransactionRepresentation =
            ciborium::from_reader(&bytes[payload_start..payload_end])
                .map_err(|e| KernelError::codec(format!("cannot decode {tx_id}: {e}")))?;
        entries.push(LogEntry {
            tx_id,
            representation,
        });
        offset = payload_end + CRC_SIZE;
    }
    Ok(entries)
}
