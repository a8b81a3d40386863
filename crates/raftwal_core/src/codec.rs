//! Framing and encoding of persisted blobs.
//!
//! Payload records in segments and the hard-state and snapshot blobs in the
//! meta file share one frame:
//!
//! ```text
//! | len (4) | crc32 (4) | bytes (len) |
//! ```
//!
//! The checksum covers a key, the length and the bytes. Segment payloads are
//! keyed on the index, term and type of the slot that points at them, so a
//! payload left at the same offset by an overwritten entry fails against the
//! replacement slot unless the replacement is the same entry. Meta blobs use
//! key zero. Covering the length means a zero-filled frame is never valid.
//!
//! Hard state and snapshot metadata are encoded as CBOR.

use crate::error::{WalError, WalResult};
use crate::types::{Entry, EntryType};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Slot fields a payload frame is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryKey {
    /// Entry index.
    pub index: u64,
    /// Entry term.
    pub term: u64,
    /// Entry type.
    pub entry_type: EntryType,
}

impl EntryKey {
    fn words(&self) -> [u64; 3] {
        [self.index, self.term, self.entry_type.as_tag()]
    }
}

impl From<&Entry> for EntryKey {
    fn from(entry: &Entry) -> Self {
        Self {
            index: entry.index,
            term: entry.term,
            entry_type: entry.entry_type,
        }
    }
}

/// Length and checksum preceding a framed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Number of bytes following the header.
    pub len: u32,
    /// CRC32 of key, length and bytes.
    pub crc: u32,
}

impl FrameHeader {
    /// Builds the header for a meta blob.
    pub fn for_payload(data: &[u8]) -> WalResult<Self> {
        Self::keyed(&[0], data)
    }

    /// Builds the header for the payload of the entry identified by `key`.
    pub fn for_entry(key: EntryKey, data: &[u8]) -> WalResult<Self> {
        Self::keyed(&key.words(), data)
    }

    fn keyed(key: &[u64], data: &[u8]) -> WalResult<Self> {
        let len = u32::try_from(data.len()).map_err(|_| {
            WalError::invalid_operation(format!("blob of {} bytes is too large", data.len()))
        })?;
        Ok(Self {
            len,
            crc: frame_crc(key, len, data),
        })
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE as usize] {
        let mut buf = [0u8; FRAME_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Decodes a header from the first eight bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < FRAME_HEADER_SIZE as usize {
            return Err(WalError::corruption("truncated frame header"));
        }
        Ok(Self {
            len: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            crc: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Total framed size, header included.
    #[must_use]
    pub fn framed_len(&self) -> u64 {
        FRAME_HEADER_SIZE + u64::from(self.len)
    }

    /// Checks a meta blob against the stored checksum.
    pub fn verify(&self, data: &[u8]) -> WalResult<()> {
        self.verify_keyed(&[0], data)
    }

    /// Checks the payload of the entry identified by `key`.
    pub fn verify_entry(&self, key: EntryKey, data: &[u8]) -> WalResult<()> {
        self.verify_keyed(&key.words(), data)
    }

    fn verify_keyed(&self, key: &[u64], data: &[u8]) -> WalResult<()> {
        let actual = frame_crc(key, self.len, data);
        if data.len() != self.len as usize || actual != self.crc {
            return Err(WalError::corruption(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                self.crc, actual
            )));
        }
        Ok(())
    }
}

fn frame_crc(key: &[u64], len: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for word in key {
        hasher.update(&word.to_le_bytes());
    }
    hasher.update(&len.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

/// Encodes a value as CBOR.
pub fn encode<T: Serialize>(value: &T) -> WalResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| WalError::invalid_operation(format!("failed to encode blob: {e}")))?;
    Ok(buf)
}

/// Decodes a CBOR value. Failure means the stored blob is corrupt.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> WalResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| WalError::corruption(format!("failed to decode blob: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfState, HardState, SnapshotMetadata};

    fn key(index: u64, term: u64) -> EntryKey {
        EntryKey {
            index,
            term,
            entry_type: EntryType::Normal,
        }
    }

    #[test]
    fn frame_header_layout() {
        let header = FrameHeader::for_payload(b"hello").unwrap();
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &5u32.to_le_bytes());
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
        assert_eq!(header.framed_len(), 13);
        assert!(header.verify(b"hello").is_ok());
    }

    #[test]
    fn frame_verify_detects_damage() {
        let header = FrameHeader::for_payload(b"hello").unwrap();
        assert!(matches!(
            header.verify(b"hellp"),
            Err(WalError::Corruption { .. })
        ));
        assert!(header.verify(b"hell").is_err());
    }

    #[test]
    fn zeroed_frame_never_verifies() {
        let header = FrameHeader::decode(&[0u8; 8]).unwrap();
        assert!(header.verify(&[]).is_err());
        assert!(header.verify_entry(key(1, 1), &[]).is_err());
    }

    #[test]
    fn entry_frames_are_bound_to_their_slot() {
        let header = FrameHeader::for_entry(key(7, 2), b"payload").unwrap();
        assert!(header.verify_entry(key(7, 2), b"payload").is_ok());
        assert!(header.verify_entry(key(8, 2), b"payload").is_err());
        assert!(header.verify(b"payload").is_err());

        // Same index and length, rewritten in a later term.
        assert!(header.verify_entry(key(7, 3), b"payload").is_err());

        let conf = EntryKey {
            entry_type: EntryType::ConfChange,
            ..key(7, 2)
        };
        assert!(header.verify_entry(conf, b"payload").is_err());
    }

    #[test]
    fn truncated_header_is_corruption() {
        assert!(FrameHeader::decode(&[1, 2, 3]).unwrap_err().is_fatal());
    }

    #[test]
    fn cbor_values() {
        let hs = HardState::new(4, 2, 9);
        assert_eq!(decode::<HardState>(&encode(&hs).unwrap()).unwrap(), hs);

        let metadata = SnapshotMetadata {
            conf_state: ConfState::with_voters(vec![1, 2, 3]),
            index: 10,
            term: 3,
        };
        assert_eq!(
            decode::<SnapshotMetadata>(&encode(&metadata).unwrap()).unwrap(),
            metadata
        );
    }

    #[test]
    fn garbage_is_corruption() {
        let result = decode::<HardState>(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(WalError::Corruption { .. })));
    }
}
