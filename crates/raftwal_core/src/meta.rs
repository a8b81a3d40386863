//! Fixed-layout metadata file.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//! 0       8     node id
//! 8       8     cluster id
//! 16      8     checkpoint index
//! 24      8     magic "RWALMETA"
//! 32      4     format version
//! 512     512   hard state frame
//! 1024    8     snapshot index
//! 1032    8     snapshot term
//! 1040    ...   snapshot frame (file doubles until it fits)
//! ```
//!
//! Frames are `| len (4) | crc32 (4) | bytes |`. A frame with length zero
//! is absent and decodes to the default value. The hard state frame holds
//! CBOR; the snapshot frame holds `| meta_len (4) | cbor metadata | data |`
//! so large snapshot data is stored as is.

use crate::codec::{self, FrameHeader, FRAME_HEADER_SIZE};
use crate::error::{WalError, WalResult};
use crate::types::{HardState, Snapshot, SnapshotMetadata};
use raftwal_storage::MappedFile;
use std::path::Path;
use tracing::{debug, warn};

/// Magic bytes identifying a meta file.
pub const META_MAGIC: [u8; 8] = *b"RWALMETA";

/// Current meta format version.
pub const META_VERSION: u32 = 1;

/// Smallest meta file.
pub const META_MIN_SIZE: u64 = 4096;

const MAGIC_OFFSET: u64 = 24;
const VERSION_OFFSET: u64 = 32;
const HARD_STATE_OFFSET: u64 = 512;
const HARD_STATE_CAPACITY: u64 = 512;
const SNAPSHOT_BLOB_OFFSET: u64 = 1040;

/// A fixed-position `u64` field of the meta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    /// Id of this node.
    NodeId,
    /// Id of the cluster the node belongs to.
    ClusterId,
    /// Highest index the application has durably applied.
    CheckpointIndex,
    /// Index covered by the stored snapshot.
    SnapshotIndex,
    /// Term of the stored snapshot.
    SnapshotTerm,
}

impl MetaField {
    /// Byte offset of the field.
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::NodeId => 0,
            Self::ClusterId => 8,
            Self::CheckpointIndex => 16,
            Self::SnapshotIndex => 1024,
            Self::SnapshotTerm => 1032,
        }
    }
}

/// Scalars, hard state and snapshot of one log, in a single mapped file.
#[derive(Debug)]
pub struct MetaStore {
    file: MappedFile,
}

impl MetaStore {
    /// Opens or creates the meta file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a file with foreign magic or a newer
    /// version, and `Corruption` if the stored snapshot cannot be read.
    pub fn open(path: &Path, initial_size: u64) -> WalResult<Self> {
        let (mut file, is_new) = MappedFile::open(path, initial_size.max(META_MIN_SIZE))?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(file.read_at(MAGIC_OFFSET, META_MAGIC.len())?);
        if is_new || magic.iter().all(|&b| b == 0) {
            file.zero(0..SNAPSHOT_BLOB_OFFSET + FRAME_HEADER_SIZE)?;
            file.write_at(MAGIC_OFFSET, &META_MAGIC)?;
            file.write_u32(VERSION_OFFSET, META_VERSION)?;
            file.sync()?;
            debug!(path = %path.display(), "initialised meta file");
        } else if magic != META_MAGIC {
            return Err(WalError::invalid_format(format!(
                "{} is not a meta file",
                path.display()
            )));
        } else {
            let version = file.read_u32(VERSION_OFFSET)?;
            if version > META_VERSION {
                return Err(WalError::invalid_format(format!(
                    "unsupported meta version {version}"
                )));
            }
        }

        let mut store = Self { file };
        store.reconcile_snapshot_fields()?;
        Ok(store)
    }

    /// Returns the path to the meta file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Returns the size of the meta file.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.file.len()
    }

    /// Returns true if the meta file is empty, which never happens once open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// Reads a scalar field.
    pub fn get_uint(&self, field: MetaField) -> WalResult<u64> {
        Ok(self.file.read_u64(field.offset())?)
    }

    /// Writes a scalar field.
    pub fn set_uint(&mut self, field: MetaField, value: u64) -> WalResult<()> {
        self.file.write_u64(field.offset(), value)?;
        Ok(())
    }

    /// Persists the hard state. An empty hard state is ignored so a valid
    /// term and vote are never replaced by nothing.
    ///
    /// The frame is rewritten in place, body before header. A process killed
    /// between the two leaves the old header over a new body, which reads
    /// back as `Corruption`.
    pub fn store_hard_state(&mut self, hs: &HardState) -> WalResult<()> {
        if hs.is_empty() {
            return Ok(());
        }

        let bytes = codec::encode(hs)?;
        let header = FrameHeader::for_payload(&bytes)?;
        if header.framed_len() > HARD_STATE_CAPACITY {
            return Err(WalError::invalid_operation(format!(
                "hard state of {} bytes exceeds its slot",
                bytes.len()
            )));
        }

        self.file
            .write_at(HARD_STATE_OFFSET + FRAME_HEADER_SIZE, &bytes)?;
        self.file.write_at(HARD_STATE_OFFSET, &header.encode())?;
        Ok(())
    }

    /// Reads the hard state, or the default if none was stored.
    pub fn hard_state(&self) -> WalResult<HardState> {
        match read_frame(self.file.slice(0)?, HARD_STATE_OFFSET)? {
            Some(bytes) => codec::decode(bytes),
            None => Ok(HardState::default()),
        }
    }

    /// Persists a snapshot. An empty snapshot is ignored.
    ///
    /// The file doubles until the encoded snapshot fits. The index and term
    /// fields are written before the blob.
    ///
    /// The blob is rewritten in place, body before header. If the process
    /// dies part way through a large body, the old header sits over a
    /// partly written body: the next open fails with `Corruption` instead
    /// of returning either snapshot.
    pub fn store_snapshot(&mut self, snap: &Snapshot) -> WalResult<()> {
        if snap.is_empty() {
            return Ok(());
        }

        let bytes = encode_snapshot(snap)?;
        let header = FrameHeader::for_payload(&bytes)?;

        let needed = SNAPSHOT_BLOB_OFFSET + header.framed_len();
        let mut size = self.file.len();
        while size < needed {
            size *= 2;
        }
        self.file.grow(size)?;

        self.set_uint(MetaField::SnapshotIndex, snap.metadata.index)?;
        self.set_uint(MetaField::SnapshotTerm, snap.metadata.term)?;
        self.file
            .write_at(SNAPSHOT_BLOB_OFFSET + FRAME_HEADER_SIZE, &bytes)?;
        self.file.write_at(SNAPSHOT_BLOB_OFFSET, &header.encode())?;

        debug!(
            index = snap.metadata.index,
            term = snap.metadata.term,
            bytes = bytes.len(),
            "stored snapshot"
        );
        Ok(())
    }

    /// Reads the snapshot, or the default if none was stored.
    pub fn snapshot(&self) -> WalResult<Snapshot> {
        match read_frame(self.file.slice(0)?, SNAPSHOT_BLOB_OFFSET)? {
            Some(bytes) => decode_snapshot(bytes),
            None => Ok(Snapshot::default()),
        }
    }

    /// Index covered by the stored snapshot, 0 if none.
    pub fn snapshot_index(&self) -> WalResult<u64> {
        self.get_uint(MetaField::SnapshotIndex)
    }

    /// Term of the stored snapshot, 0 if none.
    pub fn snapshot_term(&self) -> WalResult<u64> {
        self.get_uint(MetaField::SnapshotTerm)
    }

    /// Flushes the meta file to disk.
    pub fn sync(&self) -> WalResult<()> {
        self.file.sync()?;
        Ok(())
    }

    /// Brings the snapshot index and term fields in line with the blob after
    /// a crash between the two writes of `store_snapshot`.
    fn reconcile_snapshot_fields(&mut self) -> WalResult<()> {
        let snap = self.snapshot()?;
        let (index, term) = (snap.metadata.index, snap.metadata.term);

        let stored = (self.snapshot_index()?, self.snapshot_term()?);
        if stored != (index, term) {
            warn!(
                stored_index = stored.0,
                stored_term = stored.1,
                index,
                term,
                "snapshot fields disagree with snapshot blob, rewriting fields"
            );
            self.set_uint(MetaField::SnapshotIndex, index)?;
            self.set_uint(MetaField::SnapshotTerm, term)?;
            self.sync()?;
        }
        Ok(())
    }
}

/// Everything a meta file holds, read without mapping or repairing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaContents {
    /// Id of this node.
    pub node_id: u64,
    /// Id of the cluster.
    pub cluster_id: u64,
    /// Checkpoint index.
    pub checkpoint: u64,
    /// Format version.
    pub version: u32,
    /// Stored hard state.
    pub hard_state: HardState,
    /// Snapshot index field.
    pub snapshot_index: u64,
    /// Snapshot term field.
    pub snapshot_term: u64,
    /// Stored snapshot.
    pub snapshot: Snapshot,
}

/// Decodes and checks the raw bytes of a meta file.
///
/// Used by offline tooling that must not modify the file.
pub fn read_meta(bytes: &[u8]) -> WalResult<MetaContents> {
    let u64_at = |offset: u64| -> WalResult<u64> {
        let start = offset as usize;
        let field = bytes
            .get(start..start + 8)
            .ok_or_else(|| WalError::corruption("meta file truncated"))?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(field);
        Ok(u64::from_le_bytes(buf))
    };

    let magic = bytes
        .get(MAGIC_OFFSET as usize..MAGIC_OFFSET as usize + META_MAGIC.len())
        .ok_or_else(|| WalError::corruption("meta file truncated"))?;
    if magic != META_MAGIC {
        return Err(WalError::invalid_format("not a meta file"));
    }
    let version = bytes
        .get(VERSION_OFFSET as usize..VERSION_OFFSET as usize + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| WalError::corruption("meta file truncated"))?;
    if version > META_VERSION {
        return Err(WalError::invalid_format(format!(
            "unsupported meta version {version}"
        )));
    }

    let hard_state = match read_frame(bytes, HARD_STATE_OFFSET)? {
        Some(frame) => codec::decode(frame)?,
        None => HardState::default(),
    };
    let snapshot = match read_frame(bytes, SNAPSHOT_BLOB_OFFSET)? {
        Some(frame) => decode_snapshot(frame)?,
        None => Snapshot::default(),
    };

    Ok(MetaContents {
        node_id: u64_at(MetaField::NodeId.offset())?,
        cluster_id: u64_at(MetaField::ClusterId.offset())?,
        checkpoint: u64_at(MetaField::CheckpointIndex.offset())?,
        version,
        hard_state,
        snapshot_index: u64_at(MetaField::SnapshotIndex.offset())?,
        snapshot_term: u64_at(MetaField::SnapshotTerm.offset())?,
        snapshot,
    })
}

fn read_frame(bytes: &[u8], offset: u64) -> WalResult<Option<&[u8]>> {
    let start = offset as usize;
    let body = start + FRAME_HEADER_SIZE as usize;
    let header = FrameHeader::decode(
        bytes
            .get(start..body)
            .ok_or_else(|| WalError::corruption(format!("meta frame at {offset} is truncated")))?,
    )?;
    if header.len == 0 {
        return Ok(None);
    }

    let data = bytes.get(body..body + header.len as usize).ok_or_else(|| {
        WalError::corruption(format!(
            "meta frame at {offset} claims {} bytes past the end of the file",
            header.len
        ))
    })?;
    header.verify(data)?;
    Ok(Some(data))
}

fn encode_snapshot(snap: &Snapshot) -> WalResult<Vec<u8>> {
    let metadata = codec::encode(&snap.metadata)?;
    let metadata_len = u32::try_from(metadata.len())
        .map_err(|_| WalError::invalid_operation("snapshot metadata too large"))?;

    let mut buf = Vec::with_capacity(4 + metadata.len() + snap.data.len());
    buf.extend_from_slice(&metadata_len.to_le_bytes());
    buf.extend_from_slice(&metadata);
    buf.extend_from_slice(&snap.data);
    Ok(buf)
}

fn decode_snapshot(bytes: &[u8]) -> WalResult<Snapshot> {
    if bytes.len() < 4 {
        return Err(WalError::corruption("snapshot blob too short"));
    }
    let metadata_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if metadata_len > rest.len() {
        return Err(WalError::corruption(format!(
            "snapshot metadata length {metadata_len} exceeds blob of {} bytes",
            rest.len()
        )));
    }

    let metadata: SnapshotMetadata = codec::decode(&rest[..metadata_len])?;
    Ok(Snapshot {
        metadata,
        data: rest[metadata_len..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfState;
    use std::fs;
    use tempfile::tempdir;

    fn open(path: &Path) -> MetaStore {
        MetaStore::open(path, META_MIN_SIZE).unwrap()
    }

    #[test]
    fn new_store_is_zeroed() {
        let dir = tempdir().unwrap();
        let meta = open(&dir.path().join("wal.meta"));

        assert_eq!(meta.len(), META_MIN_SIZE);
        assert_eq!(meta.get_uint(MetaField::NodeId).unwrap(), 0);
        assert_eq!(meta.hard_state().unwrap(), HardState::default());
        assert!(meta.snapshot().unwrap().is_empty());
        assert_eq!(meta.snapshot_index().unwrap(), 0);
    }

    #[test]
    fn scalar_fields_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        {
            let mut meta = open(&path);
            meta.set_uint(MetaField::NodeId, 3).unwrap();
            meta.set_uint(MetaField::ClusterId, 0xC1).unwrap();
            meta.set_uint(MetaField::CheckpointIndex, 77).unwrap();
            meta.sync().unwrap();
        }

        let meta = open(&path);
        assert_eq!(meta.get_uint(MetaField::NodeId).unwrap(), 3);
        assert_eq!(meta.get_uint(MetaField::ClusterId).unwrap(), 0xC1);
        assert_eq!(meta.get_uint(MetaField::CheckpointIndex).unwrap(), 77);
    }

    #[test]
    fn hard_state_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        {
            let mut meta = open(&path);
            meta.store_hard_state(&HardState::new(5, 2, 40)).unwrap();
        }

        let meta = open(&path);
        assert_eq!(meta.hard_state().unwrap(), HardState::new(5, 2, 40));
    }

    #[test]
    fn empty_hard_state_is_ignored() {
        let dir = tempdir().unwrap();
        let mut meta = open(&dir.path().join("wal.meta"));

        meta.store_hard_state(&HardState::new(7, 1, 3)).unwrap();
        meta.store_hard_state(&HardState::default()).unwrap();

        assert_eq!(meta.hard_state().unwrap(), HardState::new(7, 1, 3));
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        let snap = Snapshot::new(12, 4, ConfState::with_voters(vec![1, 2]), b"state".to_vec());

        {
            let mut meta = open(&path);
            meta.store_snapshot(&snap).unwrap();
        }

        let meta = open(&path);
        assert_eq!(meta.snapshot().unwrap(), snap);
        assert_eq!(meta.snapshot_index().unwrap(), 12);
        assert_eq!(meta.snapshot_term().unwrap(), 4);
    }

    #[test]
    fn empty_snapshot_is_ignored() {
        let dir = tempdir().unwrap();
        let mut meta = open(&dir.path().join("wal.meta"));
        let snap = Snapshot::new(3, 1, ConfState::default(), b"x".to_vec());

        meta.store_snapshot(&snap).unwrap();
        meta.store_snapshot(&Snapshot::default()).unwrap();

        assert_eq!(meta.snapshot().unwrap(), snap);
    }

    #[test]
    fn large_snapshot_doubles_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        let snap = Snapshot::new(9, 2, ConfState::default(), vec![0xAB; 100_000]);

        {
            let mut meta = open(&path);
            meta.set_uint(MetaField::NodeId, 11).unwrap();
            meta.store_snapshot(&snap).unwrap();
            assert_eq!(meta.len(), 131_072);
        }

        let meta = open(&path);
        assert_eq!(meta.len(), 131_072);
        assert_eq!(meta.get_uint(MetaField::NodeId).unwrap(), 11);
        assert_eq!(meta.snapshot().unwrap(), snap);
    }

    #[test]
    fn smaller_snapshot_replaces_larger() {
        let dir = tempdir().unwrap();
        let mut meta = open(&dir.path().join("wal.meta"));

        meta.store_snapshot(&Snapshot::new(5, 1, ConfState::default(), vec![1; 5000]))
            .unwrap();
        let small = Snapshot::new(9, 2, ConfState::default(), b"tiny".to_vec());
        meta.store_snapshot(&small).unwrap();

        assert_eq!(meta.snapshot().unwrap(), small);
    }

    #[test]
    fn damaged_hard_state_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        {
            let mut meta = open(&path);
            meta.store_hard_state(&HardState::new(5, 2, 40)).unwrap();
            meta.sync().unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        bytes[HARD_STATE_OFFSET as usize + FRAME_HEADER_SIZE as usize] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let meta = open(&path);
        let err = meta.hard_state().unwrap_err();
        assert!(matches!(err, WalError::Corruption { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn partly_rewritten_snapshot_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        {
            let mut meta = open(&path);
            meta.store_snapshot(&Snapshot::new(10, 3, ConfState::default(), vec![7; 2000]))
                .unwrap();
            meta.sync().unwrap();
        }

        // Half of a newer body landed under the old header.
        let mut bytes = fs::read(&path).unwrap();
        let body = SNAPSHOT_BLOB_OFFSET as usize + FRAME_HEADER_SIZE as usize;
        bytes[body + 1000..body + 2000].fill(9);
        fs::write(&path, &bytes).unwrap();

        let result = MetaStore::open(&path, META_MIN_SIZE);
        assert!(matches!(result, Err(WalError::Corruption { .. })));
    }

    #[test]
    fn snapshot_fields_reconciled_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        {
            let mut meta = open(&path);
            meta.store_snapshot(&Snapshot::new(10, 3, ConfState::default(), b"a".to_vec()))
                .unwrap();
            // Crash after the fields of a newer snapshot were written but
            // before its blob was.
            meta.set_uint(MetaField::SnapshotIndex, 20).unwrap();
            meta.set_uint(MetaField::SnapshotTerm, 4).unwrap();
        }

        let meta = open(&path);
        assert_eq!(meta.snapshot_index().unwrap(), 10);
        assert_eq!(meta.snapshot_term().unwrap(), 3);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        fs::write(&path, vec![0x5A; 4096]).unwrap();

        let result = MetaStore::open(&path, META_MIN_SIZE);
        assert!(matches!(result, Err(WalError::InvalidFormat { .. })));
    }

    #[test]
    fn newer_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        drop(open(&path));

        let mut bytes = fs::read(&path).unwrap();
        bytes[VERSION_OFFSET as usize..VERSION_OFFSET as usize + 4]
            .copy_from_slice(&(META_VERSION + 1).to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let result = MetaStore::open(&path, META_MIN_SIZE);
        assert!(matches!(result, Err(WalError::InvalidFormat { .. })));
    }

    #[test]
    fn read_meta_matches_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        let snap = Snapshot::new(4, 2, ConfState::with_voters(vec![1]), b"s".to_vec());

        {
            let mut meta = open(&path);
            meta.set_uint(MetaField::NodeId, 2).unwrap();
            meta.store_hard_state(&HardState::new(2, 1, 4)).unwrap();
            meta.store_snapshot(&snap).unwrap();
            meta.sync().unwrap();
        }

        let contents = read_meta(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(contents.node_id, 2);
        assert_eq!(contents.version, META_VERSION);
        assert_eq!(contents.hard_state, HardState::new(2, 1, 4));
        assert_eq!(contents.snapshot, snap);
        assert_eq!((contents.snapshot_index, contents.snapshot_term), (4, 2));

        assert!(read_meta(&[0u8; 16]).unwrap_err().is_fatal());
    }
}
