use super::{BackendKind, Backing, Mapping, SegmentBackend, backend_io_error, page_size};
use crate::error::{ShmError, ShmResult};
use memmap2::MmapMut;
use std::sync::Arc;
use tracing::debug;

/// Locked anonymous memory shared by every holder in the process.
///
/// Page locking needs `CAP_IPC_LOCK` or a sufficient `RLIMIT_MEMLOCK`; when
/// it is refused the backend reports `PermissionDenied`.
pub struct SharedBackend {
    page_size: usize,
}

impl SharedBackend {
    /// Check that this process may lock pages; fails with `PermissionDenied`
    /// otherwise.
    pub fn probe() -> ShmResult<Self> {
        let backend = Self {
            page_size: page_size(),
        };
        let probe = backend.lock_anon(backend.page_size)?;
        drop(probe);
        debug!("shared backend available (page size {})", backend.page_size);
        Ok(backend)
    }

    fn lock_anon(&self, len: usize) -> ShmResult<MmapMut> {
        let map = MmapMut::map_anon(len).map_err(|e| ShmError::AllocationFailed {
            reason: format!("anonymous map of {len} bytes: {e}"),
        })?;
        map.lock().map_err(|e| backend_io_error("mlock", e))?;
        Ok(map)
    }
}

impl SegmentBackend for SharedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }

    fn alignment(&self) -> usize {
        self.page_size
    }

    fn counts_kernel_side(&self) -> bool {
        true
    }

    fn allocate(&self, _key: i32, act_size: usize) -> ShmResult<Backing> {
        // Anonymous pages come zero-filled.
        let map = self.lock_anon(act_size)?;
        Ok(Backing::Shared(Arc::new(Mapping::new(map)?)))
    }

    fn map(&self, backing: &Backing) -> ShmResult<Arc<Mapping>> {
        match backing {
            Backing::Shared(mapping) => Ok(Arc::clone(mapping)),
            Backing::Posix { .. } => Err(ShmError::invalid(
                "posix backing handed to shared backend",
            )),
        }
    }

    fn free(&self, backing: Backing) -> ShmResult<()> {
        match backing {
            // Pages are unmapped once the detaching holder drops its clone.
            Backing::Shared(mapping) => {
                drop(mapping);
                Ok(())
            }
            Backing::Posix { .. } => Err(ShmError::invalid(
                "posix backing handed to shared backend",
            )),
        }
    }
}
