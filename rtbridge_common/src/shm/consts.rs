//! SHM (Shared Memory) constants.
//!
//! These constants define the fundamental parameters of the segment registry,
//! the ring layout and the frame codec. All other crates import from here.

/// Reserved segment key. Never assigned to a user segment.
pub const RESERVED_SEGMENT_KEY: i32 = 0;

/// Default number of slots in the segment table.
pub const DEFAULT_MAX_SEGMENTS: usize = 100;

/// Maximum shared memory segment size in bytes (1GB).
pub const SHM_MAX_SIZE: usize = 1_073_741_824;

/// Alignment used when the page size cannot be queried.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// CPU cache line size in bytes.
///
/// The ring header is padded to this size so cursors never share a line
/// with payload bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Bytes reserved at the start of a ring segment for the ring header.
pub const RING_HEADER_SIZE: usize = CACHE_LINE_SIZE;

/// Largest supported ring capacity. Cursors run over `[0, 2 * capacity)`
/// and must fit in a `u32`.
pub const RING_MAX_CAPACITY: usize = (u32::MAX / 2) as usize;

/// Size of an encoded frame header (`length: u32` + `flags: u32`).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Prefix of POSIX shared memory object names under `/dev/shm`.
pub const POSIX_SHM_PREFIX: &str = "rtbridge";
