//! Growable memory-mapped file.
#![allow(unsafe_code)]

use crate::error::{StorageError, StorageResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file mapped read-write into memory that can grow in place.
///
/// All access goes through borrows of the `MappedFile` itself, and
/// [`MappedFile::grow`] takes `&mut self`, so no slice handed out before a
/// grow can be used after it. The mapping may move during a grow.
///
/// # Durability
///
/// Writes land in the page cache immediately and are visible to any later
/// open of the same file, even after the process dies. They only survive a
/// machine crash once [`MappedFile::sync`] has returned.
///
/// # Failure
///
/// If a grow fails part way, the file is poisoned: every later call returns
/// [`StorageError::Poisoned`]. A partially grown mapping is never used.
///
/// # Example
///
/// ```no_run
/// use raftwal_storage::MappedFile;
/// use std::path::Path;
///
/// let (mut file, is_new) = MappedFile::open(Path::new("data.bin"), 4096).unwrap();
/// if is_new {
///     file.zero(0..64).unwrap();
/// }
/// file.write_u64(0, 42).unwrap();
/// file.grow(8192).unwrap();
/// assert_eq!(file.read_u64(0).unwrap(), 42);
/// file.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    map: MmapMut,
    poisoned: bool,
}

impl MappedFile {
    /// Opens or creates a mapped file of at least `initial_size` bytes.
    ///
    /// A file smaller than `initial_size` is extended with zeros; a larger
    /// file is mapped whole. The returned flag is true when the file did not
    /// exist or was empty, in which case the caller must initialise any
    /// header regions it relies on.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial_size` is zero or the file cannot be
    /// opened, extended or mapped.
    pub fn open(path: &Path, initial_size: u64) -> StorageResult<(Self, bool)> {
        if initial_size == 0 {
            return Err(StorageError::InvalidSize(0));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let current = file.metadata()?.len();
        let is_new = current == 0;
        if current < initial_size {
            file.set_len(initial_size)?;
        }

        let map = map_file(&file, current.max(initial_size))?;
        debug!(path = %path.display(), size = map.len(), is_new, "mapped file");

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                map,
                poisoned: false,
            },
            is_new,
        ))
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the size of the current mapping in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    /// Returns true if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns true if an earlier grow failed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the bytes from `offset` to the end of the mapping.
    pub fn slice(&self, offset: u64) -> StorageResult<&[u8]> {
        let range = self.bounds(offset, 0)?;
        Ok(&self.map[range.start..])
    }

    /// Returns the mutable bytes from `offset` to the end of the mapping.
    pub fn slice_mut(&mut self, offset: u64) -> StorageResult<&mut [u8]> {
        let range = self.bounds(offset, 0)?;
        Ok(&mut self.map[range.start..])
    }

    /// Returns `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> StorageResult<&[u8]> {
        let range = self.bounds(offset, len)?;
        Ok(&self.map[range])
    }

    /// Copies `data` into the mapping at `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let range = self.bounds(offset, data.len())?;
        self.map[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads a little-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: u64) -> StorageResult<u64> {
        let bytes = self.read_at(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes a little-endian `u64` at `offset`.
    pub fn write_u64(&mut self, offset: u64, value: u64) -> StorageResult<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Reads a little-endian `u32` at `offset`.
    pub fn read_u32(&self, offset: u64) -> StorageResult<u32> {
        let bytes = self.read_at(offset, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a little-endian `u32` at `offset`.
    pub fn write_u32(&mut self, offset: u64, value: u32) -> StorageResult<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Fills `range` with zeros.
    pub fn zero(&mut self, range: Range<u64>) -> StorageResult<()> {
        let len = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(|_| StorageError::InvalidSize(range.end))?;
        let range = self.bounds(range.start, len)?;
        self.map[range].fill(0);
        Ok(())
    }

    /// Grows the file and its mapping to `new_size` bytes.
    ///
    /// Dirty pages are flushed before the file is touched. On Linux the
    /// mapping is resized with `mremap`; elsewhere it is unmapped, the file
    /// is extended, and the file is mapped again. Growing to a size not
    /// larger than the current one does nothing.
    ///
    /// # Errors
    ///
    /// Any failure after the flush poisons the file and returns
    /// [`StorageError::GrowFailed`].
    pub fn grow(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_usable()?;

        let current = self.len();
        if new_size <= current {
            return Ok(());
        }

        self.sync()?;

        if let Err(e) = self.remap(new_size) {
            self.poisoned = true;
            return Err(StorageError::GrowFailed {
                path: self.path.display().to_string(),
                requested: new_size,
                reason: e.to_string(),
            });
        }

        let mapped = self.len();
        if mapped != new_size {
            self.poisoned = true;
            return Err(StorageError::GrowFailed {
                path: self.path.display().to_string(),
                requested: new_size,
                reason: format!("mapping is {mapped} bytes after remap"),
            });
        }

        debug!(path = %self.path.display(), from = current, to = new_size, "grew mapping");
        Ok(())
    }

    /// Flushes dirty pages to stable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.ensure_usable()?;
        self.map.flush()?;
        Ok(())
    }

    /// Unmaps and deletes the file.
    pub fn remove(self) -> StorageResult<()> {
        let Self { path, file, map, .. } = self;
        drop(map);
        drop(file);
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "removed mapped file");
        Ok(())
    }

    fn ensure_usable(&self) -> StorageResult<()> {
        if self.poisoned {
            return Err(StorageError::Poisoned {
                path: self.path.display().to_string(),
            });
        }
        Ok(())
    }

    fn bounds(&self, offset: u64, len: usize) -> StorageResult<Range<usize>> {
        self.ensure_usable()?;

        let mapped = self.len();
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= mapped => Ok(offset as usize..end as usize),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                mapped,
            }),
        }
    }

    #[cfg(target_os = "linux")]
    fn remap(&mut self, new_size: u64) -> io::Result<()> {
        use memmap2::RemapOptions;

        let len = mapping_len(new_size)?;
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        // SAFETY: the file was just extended to `len` bytes, and `&mut self`
        // guarantees no slice into the old mapping is alive.
        unsafe { self.map.remap(len, RemapOptions::new().may_move(true)) }
    }

    #[cfg(not(target_os = "linux"))]
    fn remap(&mut self, new_size: u64) -> io::Result<()> {
        let len = mapping_len(new_size)?;
        // Some platforms refuse to resize a file while it is mapped.
        drop(std::mem::replace(&mut self.map, MmapMut::map_anon(1)?));
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        // SAFETY: the file is at least `len` bytes and only this process
        // maps it read-write.
        self.map = unsafe { MmapOptions::new().len(len).map_mut(&self.file)? };
        Ok(())
    }
}

fn mapping_len(size: u64) -> io::Result<usize> {
    usize::try_from(size).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("mapping size {size} overflows usize"),
        )
    })
}

fn map_file(file: &File, size: u64) -> StorageResult<MmapMut> {
    let len = usize::try_from(size).map_err(|_| StorageError::InvalidSize(size))?;
    // SAFETY: the file is at least `len` bytes. Callers hold the data
    // directory lock, so no other process truncates it underneath us.
    let map = unsafe { MmapOptions::new().len(len).map_mut(file)? };
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_sized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.map");

        let (file, is_new) = MappedFile::open(&path, 4096).unwrap();
        assert!(is_new);
        assert_eq!(file.len(), 4096);
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
        assert!(file.slice(0).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn open_zero_size_fails() {
        let dir = tempdir().unwrap();
        let result = MappedFile::open(&dir.path().join("zero.map"), 0);
        assert!(matches!(result, Err(StorageError::InvalidSize(0))));
    }

    #[test]
    fn reopen_keeps_data_and_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.map");

        {
            let (mut file, _) = MappedFile::open(&path, 4096).unwrap();
            file.write_u64(16, 0xDEAD_BEEF).unwrap();
            file.grow(16384).unwrap();
            file.write_at(10_000, b"tail").unwrap();
            file.sync().unwrap();
        }

        let (file, is_new) = MappedFile::open(&path, 4096).unwrap();
        assert!(!is_new);
        assert_eq!(file.len(), 16384);
        assert_eq!(file.read_u64(16).unwrap(), 0xDEAD_BEEF);
        assert_eq!(file.read_at(10_000, 4).unwrap(), b"tail");
    }

    #[test]
    fn unsynced_writes_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.map");

        {
            let (mut file, _) = MappedFile::open(&path, 4096).unwrap();
            file.write_u32(100, 7).unwrap();
        }

        let (file, _) = MappedFile::open(&path, 4096).unwrap();
        assert_eq!(file.read_u32(100).unwrap(), 7);
    }

    #[test]
    fn grow_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.map");

        let (mut file, _) = MappedFile::open(&path, 4096).unwrap();
        file.write_at(4000, b"boundary").unwrap();
        file.grow(8192).unwrap();

        assert_eq!(file.len(), 8192);
        assert_eq!(file.read_at(4000, 8).unwrap(), b"boundary");
        assert!(file.slice(4096 + 8).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_to_smaller_size_is_noop() {
        let dir = tempdir().unwrap();
        let (mut file, _) = MappedFile::open(&dir.path().join("test.map"), 8192).unwrap();

        file.grow(4096).unwrap();
        assert_eq!(file.len(), 8192);
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let dir = tempdir().unwrap();
        let (mut file, _) = MappedFile::open(&dir.path().join("test.map"), 64).unwrap();

        assert!(matches!(
            file.read_at(60, 8),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            file.write_u64(u64::MAX - 2, 1),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(file.slice(64).unwrap().is_empty());
        assert!(file.slice(65).is_err());
    }

    #[test]
    fn zero_clears_range() {
        let dir = tempdir().unwrap();
        let (mut file, _) = MappedFile::open(&dir.path().join("test.map"), 64).unwrap();

        file.write_at(0, &[0xFF; 64]).unwrap();
        file.zero(8..16).unwrap();

        assert_eq!(file.read_u64(8).unwrap(), 0);
        assert_eq!(file.read_u64(0).unwrap(), u64::MAX);
        assert_eq!(file.read_u64(16).unwrap(), u64::MAX);
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.map");

        let (file, _) = MappedFile::open(&path, 64).unwrap();
        file.remove().unwrap();
        assert!(!path.exists());
    }

    proptest! {
        #[test]
        fn writes_survive_repeated_growth(
            writes in prop::collection::vec((0u64..4088, any::<u64>()), 1..32),
            doublings in 1u32..4,
        ) {
            let dir = tempdir().unwrap();
            let (mut file, _) = MappedFile::open(&dir.path().join("p.map"), 4096).unwrap();

            let mut expected = vec![0u8; 4096];
            for (offset, value) in &writes {
                file.write_u64(*offset, *value).unwrap();
                let at = *offset as usize;
                expected[at..at + 8].copy_from_slice(&value.to_le_bytes());
            }

            for i in 1..=doublings {
                file.grow(4096 << i).unwrap();
            }

            prop_assert_eq!(file.len(), 4096 << doublings);
            prop_assert_eq!(file.read_at(0, 4096).unwrap(), &expected[..]);
        }
    }
}
