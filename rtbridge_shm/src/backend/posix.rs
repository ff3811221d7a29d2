use super::{BackendKind, Backing, Mapping, SegmentBackend, backend_io_error, page_size};
use crate::error::{ShmError, ShmResult};
use memmap2::MmapOptions;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named shared memory files, one per segment.
pub struct PosixBackend {
    dir: PathBuf,
    prefix: String,
    page_size: usize,
}

impl PosixBackend {
    /// Backend placing segment files under `dir` named `{prefix}_{key:08x}`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            page_size: page_size(),
        }
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: i32) -> PathBuf {
        self.dir.join(format!("{}_{:08x}", self.prefix, key))
    }

    /// Look up a segment file created by another registry, possibly in
    /// another process.
    ///
    /// Returns `None` when no file exists for `key`. The name stays owned by
    /// its creator: freeing an adopted backing only drops the local record.
    pub fn adopt(&self, key: i32) -> ShmResult<Option<Backing>> {
        let path = self.path_for(key);
        let len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(backend_io_error("shm stat", e)),
        };

        // The creator has opened the file but not sized it yet.
        if len == 0 {
            return Err(ShmError::Busy);
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|len| len % self.page_size == 0)
            .ok_or_else(|| {
                ShmError::protocol(format!(
                    "{} has length {len}, not a whole number of pages",
                    path.display()
                ))
            })?;

        debug!("adopting posix segment {} ({len} bytes)", path.display());
        Ok(Some(Backing::Posix {
            path,
            len,
            owned: false,
        }))
    }

    /// Directory holding segment files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SegmentBackend for PosixBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Posix
    }

    fn alignment(&self) -> usize {
        self.page_size
    }

    fn counts_kernel_side(&self) -> bool {
        false
    }

    fn allocate(&self, key: i32, act_size: usize) -> ShmResult<Backing> {
        let path = self.path_for(key);

        // Another process may hold the existing file mapped; never replace it.
        let file = match OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .mode(0o600) // Owner read/write only
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ShmError::AlreadyExists { key });
            }
            Err(e) => return Err(backend_io_error("shm open", e)),
        };

        // Extending a fresh file zero-fills it.
        if let Err(e) = file.set_len(act_size as u64) {
            let _ = std::fs::remove_file(&path);
            return Err(backend_io_error("shm resize", e));
        }

        debug!("posix segment {} ({} bytes)", path.display(), act_size);
        Ok(Backing::Posix {
            path,
            len: act_size,
            owned: true,
        })
    }

    fn map(&self, backing: &Backing) -> ShmResult<Arc<Mapping>> {
        let Backing::Posix { path, len, .. } = backing else {
            return Err(ShmError::invalid("shared backing handed to posix backend"));
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| backend_io_error("shm attach", e))?;

        let actual = file.metadata()?.len();
        if actual != *len as u64 {
            return Err(ShmError::protocol(format!(
                "{} is {actual} bytes, expected {len}",
                path.display()
            )));
        }

        let map = unsafe { MmapOptions::new().len(*len).populate().map_mut(&file)? };
        Ok(Arc::new(Mapping::new(map)?))
    }

    fn free(&self, backing: Backing) -> ShmResult<()> {
        let Backing::Posix { path, owned, .. } = backing else {
            return Err(ShmError::invalid("shared backing handed to posix backend"));
        };
        if !owned {
            debug!("leaving adopted shm file {} to its creator", path.display());
            return Ok(());
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("shm file {} already removed", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_mappings_share_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path(), "t");
        let backing = backend.allocate(0x42, 4096).unwrap();

        let a = backend.map(&backing).unwrap();
        let b = backend.map(&backing).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());

        unsafe {
            assert_eq!(*b.as_ptr(), 0);
            *a.as_ptr() = 0xAB;
            assert_eq!(*b.as_ptr(), 0xAB);
        }

        drop((a, b));
        let path = backend.path_for(0x42);
        backend.free(backing).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_never_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path(), "t");
        std::fs::write(backend.path_for(7), b"leftover").unwrap();

        let err = backend.allocate(7, 4096).err().unwrap();
        assert!(matches!(err, ShmError::AlreadyExists { key: 7 }));
        assert_eq!(std::fs::read(backend.path_for(7)).unwrap(), b"leftover");
    }

    #[test]
    fn test_adopted_file_maps_same_bytes_and_survives_free() {
        let dir = tempfile::tempdir().unwrap();
        let creator = PosixBackend::new(dir.path(), "t");
        let other = PosixBackend::new(dir.path(), "t");
        assert!(other.adopt(5).unwrap().is_none());

        let owned = creator.allocate(5, 4096).unwrap();
        let adopted = other.adopt(5).unwrap().unwrap();
        assert_eq!(adopted.len(), 4096);

        let a = creator.map(&owned).unwrap();
        let b = other.map(&adopted).unwrap();
        unsafe {
            *a.as_ptr() = 0x5A;
            assert_eq!(*b.as_ptr(), 0x5A);
        }

        other.free(adopted).unwrap();
        assert!(creator.path_for(5).exists());
        drop((a, b));
        creator.free(owned).unwrap();
        assert!(!creator.path_for(5).exists());
    }

    #[test]
    fn test_adopt_rejects_unaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path(), "t");
        std::fs::write(backend.path_for(3), b"odd").unwrap();
        let err = backend.adopt(3).err().unwrap();
        assert!(matches!(err, ShmError::Protocol { .. }));
    }

    #[test]
    fn test_truncated_file_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path(), "t");
        let backing = backend.allocate(9, 8192).unwrap();
        std::fs::OpenOptions::new()
            .write(true)
            .open(backend.path_for(9))
            .unwrap()
            .set_len(4096)
            .unwrap();

        let err = backend.map(&backing).err().unwrap();
        assert!(matches!(err, ShmError::Protocol { .. }));
    }
}
