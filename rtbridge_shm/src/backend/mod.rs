//! Memory backends behind the segment registry
//!
//! - [`SharedBackend`]: locked anonymous memory mapped once and shared by
//!   every holder in the process. Counts RT-side and non-RT attaches apart.
//! - [`PosixBackend`]: named file under a shm directory; each attach maps the
//!   file on its own, so independent processes reach the same memory by key.
//!   RT-side attaches are counted as non-RT.

mod posix;
mod shared;

pub use posix::PosixBackend;
pub use shared::SharedBackend;

use crate::error::{ShmError, ShmResult};
use memmap2::MmapMut;
use rtbridge_common::shm::consts::FALLBACK_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::ptr::NonNull;
use std::str::FromStr;
use std::sync::Arc;

/// Backend holding a given segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Privileged shared backend
    Shared,
    /// POSIX fallback
    Posix,
}

/// Backend selection at registry construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Probe the shared backend, fall back to POSIX on `PermissionDenied`.
    #[default]
    Auto,
    /// Shared backend only; failing probe is an error.
    Shared,
    /// POSIX backend only.
    Posix,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "shared" => Ok(Self::Shared),
            "posix" => Ok(Self::Posix),
            other => Err(format!(
                "unknown backend '{other}' (expected auto, shared or posix)"
            )),
        }
    }
}

/// Backend-side storage of one segment.
pub enum Backing {
    /// One mapping shared by all holders.
    Shared(Arc<Mapping>),
    /// Named shm file of `len` bytes.
    Posix {
        /// File path
        path: PathBuf,
        /// File length
        len: usize,
        /// Created by this process; only the owner unlinks the name.
        owned: bool,
    },
}

impl Backing {
    /// Size of the backing memory in bytes.
    pub fn len(&self) -> usize {
        match self {
            Backing::Shared(mapping) => mapping.len(),
            Backing::Posix { len, .. } => *len,
        }
    }

    /// True for zero-length backing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Seam between the registry and a memory provider.
pub trait SegmentBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Allocation granularity; segment sizes are rounded up to it.
    fn alignment(&self) -> usize;

    /// Whether RT-side attaches are counted separately.
    fn counts_kernel_side(&self) -> bool;

    /// Obtain `act_size` bytes of zeroed memory for `key`.
    fn allocate(&self, key: i32, act_size: usize) -> ShmResult<Backing>;

    /// Produce a complete mapping of `backing` for one holder.
    fn map(&self, backing: &Backing) -> ShmResult<Arc<Mapping>>;

    /// Release backend memory. Called only with no holders left.
    fn free(&self, backing: Backing) -> ShmResult<()>;
}

/// A live mapping of segment memory.
///
/// Holders access the memory through raw pointers; synchronisation is the
/// business of the structures placed inside it (see [`crate::ring`]).
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    _map: MmapMut,
}

// The mapping is plain shared memory; concurrent access goes through atomics
// in the ring header.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub(crate) fn new(mut map: MmapMut) -> ShmResult<Self> {
        let len = map.len();
        let ptr = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| ShmError::protocol("mapping returned a null pointer"))?;
        Ok(Self {
            ptr,
            len,
            _map: map,
        })
    }

    /// Base address.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length mapping.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// System page size.
pub fn page_size() -> usize {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// Round `size` up to a multiple of `align`.
pub(crate) fn align_up(size: usize, align: usize) -> ShmResult<usize> {
    size.div_ceil(align)
        .checked_mul(align)
        .ok_or_else(|| ShmError::invalid(format!("size {size} overflows when aligned")))
}

/// Map an IO error from a backend call, separating privilege failures so the
/// registry can fall back.
pub(crate) fn backend_io_error(op: &str, err: std::io::Error) -> ShmError {
    match err.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) | Some(libc::ENOMEM) | Some(libc::EAGAIN) => {
            ShmError::PermissionDenied {
                reason: format!("{op}: {err}"),
            }
        }
        _ => ShmError::AllocationFailed {
            reason: format!("{op}: {err}"),
        },
    }
}
