//! Single-writer/single-reader byte ring inside a segment
//!
//! ```text
//! offset 0                 RING_HEADER_SIZE                 + capacity
//! ┌────────────────────────┬──────────────────────────────────┐
//! │ RingHeader (atomics)   │ data                             │
//! └────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Cursors run over `[0, 2 * capacity)` so a full ring (`in_flight ==
//! capacity`) is distinguishable from an empty one. A byte at cursor `c` lives
//! at data index `c % capacity`.
//!
//! The writer stages bytes past the published write cursor and publishes them
//! with one release store; the reader mirrors this with its own pending read
//! position. Nothing staged is visible to the other side until published.

use crate::error::{ShmError, ShmResult};
use crate::registry::SegmentHandle;
use rtbridge_common::shm::consts::{RING_HEADER_SIZE, RING_MAX_CAPACITY};
use static_assertions::const_assert_eq;
use std::borrow::Cow;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Ring control block at offset 0 of the segment.
#[repr(C, align(64))]
pub struct RingHeader {
    capacity: AtomicU32,
    write_cursor: AtomicU32,
    read_cursor: AtomicU32,
    writer_owner: AtomicI32,
    reader_owner: AtomicI32,
}

const_assert_eq!(std::mem::size_of::<RingHeader>(), RING_HEADER_SIZE);

/// A ring inside an attached segment, not yet bound to a side.
pub struct Ring {
    handle: SegmentHandle,
    capacity: u32,
}

impl Ring {
    /// Initialise a ring of `capacity` data bytes in `handle`'s segment.
    ///
    /// Refused while either side of an existing ring is bound.
    pub fn format(handle: SegmentHandle, capacity: usize) -> ShmResult<Self> {
        if capacity == 0 || capacity > RING_MAX_CAPACITY {
            return Err(ShmError::invalid(format!(
                "ring capacity {capacity} outside 1..={RING_MAX_CAPACITY}"
            )));
        }
        if RING_HEADER_SIZE + capacity > handle.len() {
            return Err(ShmError::invalid(format!(
                "ring of {capacity} bytes does not fit segment of {} bytes",
                handle.len()
            )));
        }

        let header = Self::header_of(&handle);
        for (role, owner) in [
            ("writer", &header.writer_owner),
            ("reader", &header.reader_owner),
        ] {
            let owner = owner.load(Ordering::Acquire);
            if owner != 0 {
                return Err(ShmError::AlreadyBound { role, owner });
            }
        }
        header.write_cursor.store(0, Ordering::Relaxed);
        header.read_cursor.store(0, Ordering::Relaxed);
        header.capacity.store(capacity as u32, Ordering::Release);

        Ok(Self {
            handle,
            capacity: capacity as u32,
        })
    }

    /// Open a ring previously formatted in `handle`'s segment.
    pub fn open(handle: SegmentHandle) -> ShmResult<Self> {
        let capacity = Self::header_of(&handle).capacity.load(Ordering::Acquire);
        if capacity == 0 {
            return Err(ShmError::invalid(format!(
                "segment {} holds no ring",
                handle.key()
            )));
        }
        if RING_HEADER_SIZE + capacity as usize > handle.len() {
            return Err(ShmError::protocol(format!(
                "ring capacity {capacity} exceeds segment of {} bytes",
                handle.len()
            )));
        }
        Ok(Self { handle, capacity })
    }

    /// Data capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Published bytes not yet consumed.
    pub fn in_flight(&self) -> usize {
        let h = self.header();
        self.distance(
            h.write_cursor.load(Ordering::Acquire),
            h.read_cursor.load(Ordering::Acquire),
        )
    }

    /// Bind the writing side.
    pub fn into_writer(self, owner: i32) -> ShmResult<RingWriter> {
        self.bind(&self.header().writer_owner, "writer", owner)?;
        let pending = self.header().write_cursor.load(Ordering::Acquire);
        Ok(RingWriter {
            ring: self,
            owner,
            pending,
        })
    }

    /// Bind the reading side.
    pub fn into_reader(self, owner: i32) -> ShmResult<RingReader> {
        self.bind(&self.header().reader_owner, "reader", owner)?;
        let pending = self.header().read_cursor.load(Ordering::Acquire);
        Ok(RingReader {
            ring: self,
            owner,
            pending,
        })
    }

    fn bind(&self, slot: &AtomicI32, role: &'static str, owner: i32) -> ShmResult<()> {
        if owner == 0 {
            return Err(ShmError::invalid("ring owner id must be non-zero"));
        }
        slot.compare_exchange(0, owner, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| ShmError::AlreadyBound {
                role,
                owner: current,
            })
    }

    fn header_of(handle: &SegmentHandle) -> &RingHeader {
        // Mappings are page aligned and at least RING_HEADER_SIZE long once
        // the ring fits; format/open check the latter.
        unsafe { &*(handle.as_ptr() as *const RingHeader) }
    }

    fn header(&self) -> &RingHeader {
        Self::header_of(&self.handle)
    }

    fn data(&self) -> *mut u8 {
        unsafe { self.handle.as_ptr().add(RING_HEADER_SIZE) }
    }

    fn distance(&self, ahead: u32, behind: u32) -> usize {
        let range = 2 * u64::from(self.capacity);
        ((u64::from(ahead) + range - u64::from(behind)) % range) as usize
    }

    fn advance(&self, cursor: u32, n: usize) -> u32 {
        let range = 2 * u64::from(self.capacity);
        ((u64::from(cursor) + n as u64) % range) as u32
    }

    fn index(&self, cursor: u32) -> usize {
        (cursor % self.capacity) as usize
    }

    /// Copy `src` into the data region starting at `cursor`, wrapping.
    fn copy_in(&self, cursor: u32, src: &[u8]) {
        let start = self.index(cursor);
        let first = src.len().min(self.capacity() - start);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.data().add(start), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data(), src.len() - first);
        }
    }

    /// Copy from the data region starting at `cursor` into `dst`, wrapping.
    fn copy_out(&self, cursor: u32, dst: &mut [u8]) {
        let start = self.index(cursor);
        let first = dst.len().min(self.capacity() - start);
        unsafe {
            std::ptr::copy_nonoverlapping(self.data().add(start), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(self.data(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }
}

/// Writing side of a ring.
pub struct RingWriter {
    ring: Ring,
    owner: i32,
    pending: u32,
}

impl RingWriter {
    /// Data capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes that can be written now, net of anything staged.
    pub fn free_space(&self) -> usize {
        let read = self.ring.header().read_cursor.load(Ordering::Acquire);
        self.ring.capacity() - self.ring.distance(self.pending, read)
    }

    /// Check that `n` bytes fit.
    ///
    /// `InvalidArgument` if `n` exceeds the capacity (it can never fit),
    /// `WouldBlock` if the reader has not yet freed enough space.
    pub fn write_reserve(&self, n: usize) -> ShmResult<()> {
        if n > self.ring.capacity() {
            return Err(ShmError::invalid(format!(
                "{n} bytes exceed ring capacity {}",
                self.ring.capacity()
            )));
        }
        let free = self.free_space();
        if n > free {
            return Err(ShmError::WouldBlock { needed: n, free });
        }
        Ok(())
    }

    /// Write `bytes` and make them visible to the reader.
    pub fn write_commit(&mut self, bytes: &[u8]) -> ShmResult<()> {
        self.write_reserve(bytes.len())?;
        self.stage(bytes);
        self.publish();
        Ok(())
    }

    /// Owner id bound to this side.
    pub fn owner(&self) -> i32 {
        self.owner
    }

    /// Append staged bytes. Caller has reserved the space.
    pub(crate) fn stage(&mut self, bytes: &[u8]) -> u32 {
        let at = self.pending;
        self.ring.copy_in(at, bytes);
        self.pending = self.ring.advance(at, bytes.len());
        at
    }

    /// Overwrite already staged bytes at `cursor`.
    pub(crate) fn patch(&mut self, cursor: u32, bytes: &[u8]) {
        self.ring.copy_in(cursor, bytes);
    }

    /// Bytes staged since the last publish or rollback.
    pub(crate) fn staged(&self) -> usize {
        let published = self.ring.header().write_cursor.load(Ordering::Relaxed);
        self.ring.distance(self.pending, published)
    }

    pub(crate) fn publish(&mut self) {
        self.ring
            .header()
            .write_cursor
            .store(self.pending, Ordering::Release);
    }

    pub(crate) fn rollback(&mut self) {
        self.pending = self.ring.header().write_cursor.load(Ordering::Relaxed);
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        let _ = self.ring.header().writer_owner.compare_exchange(
            self.owner,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

/// Reading side of a ring.
pub struct RingReader {
    ring: Ring,
    owner: i32,
    pending: u32,
}

impl RingReader {
    /// Data capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Published bytes past the pending read position.
    pub fn available(&self) -> usize {
        let write = self.ring.header().write_cursor.load(Ordering::Acquire);
        self.ring.distance(write, self.pending)
    }

    /// Contiguous readable bytes, up to the wrap point.
    pub fn read_peek(&self) -> Option<&[u8]> {
        let available = self.available();
        if available == 0 {
            return None;
        }
        let start = self.ring.index(self.pending);
        let len = available.min(self.ring.capacity() - start);
        Some(unsafe { std::slice::from_raw_parts(self.ring.data().add(start), len) })
    }

    /// Consume `n` bytes and hand the space back to the writer.
    pub fn read_advance(&mut self, n: usize) -> ShmResult<()> {
        self.consume(n)?;
        self.publish();
        Ok(())
    }

    /// Owner id bound to this side.
    pub fn owner(&self) -> i32 {
        self.owner
    }

    /// `len` bytes starting `offset` past the pending position. Borrowed when
    /// contiguous, copied when they straddle the wrap point.
    pub(crate) fn bytes_at(&self, offset: usize, len: usize) -> Option<Cow<'_, [u8]>> {
        if offset + len > self.available() {
            return None;
        }
        let cursor = self.ring.advance(self.pending, offset);
        let start = self.ring.index(cursor);
        if start + len <= self.ring.capacity() {
            let slice = unsafe { std::slice::from_raw_parts(self.ring.data().add(start), len) };
            Some(Cow::Borrowed(slice))
        } else {
            let mut buf = vec![0u8; len];
            self.ring.copy_out(cursor, &mut buf);
            Some(Cow::Owned(buf))
        }
    }

    /// Copy `dst.len()` bytes starting `offset` past the pending position.
    pub(crate) fn copy_at(&self, offset: usize, dst: &mut [u8]) -> bool {
        if offset + dst.len() > self.available() {
            return false;
        }
        self.ring.copy_out(self.ring.advance(self.pending, offset), dst);
        true
    }

    /// Move the pending position without releasing space.
    pub(crate) fn consume(&mut self, n: usize) -> ShmResult<()> {
        let available = self.available();
        if n > available {
            return Err(ShmError::invalid(format!(
                "cannot consume {n} bytes, {available} available"
            )));
        }
        self.pending = self.ring.advance(self.pending, n);
        Ok(())
    }

    /// Bytes consumed since the last publish or rollback.
    pub(crate) fn consumed(&self) -> usize {
        let published = self.ring.header().read_cursor.load(Ordering::Relaxed);
        self.ring.distance(self.pending, published)
    }

    pub(crate) fn publish(&mut self) {
        self.ring
            .header()
            .read_cursor
            .store(self.pending, Ordering::Release);
    }

    pub(crate) fn rollback(&mut self) {
        self.pending = self.ring.header().read_cursor.load(Ordering::Relaxed);
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        let _ = self.ring.header().reader_owner.compare_exchange(
            self.owner,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendChoice;
    use crate::registry::{RegistryConfig, SegmentRegistry};
    use crate::segment::{Identity, SegmentOptions};

    fn ring_pair(dir: &tempfile::TempDir, capacity: usize) -> (RingWriter, RingReader) {
        let reg = SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            posix_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        })
        .unwrap();
        let size = RING_HEADER_SIZE + capacity;
        let opts = SegmentOptions::default();
        let w = reg.attach_or_create(Identity::user(1), 77, size, &opts).unwrap();
        let r = reg.attach(Identity::kernel(2), 77).unwrap();
        let writer = Ring::format(w, capacity).unwrap().into_writer(1).unwrap();
        let reader = Ring::open(r).unwrap().into_reader(2).unwrap();
        (writer, reader)
    }

    #[test]
    fn test_full_ring_is_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, r) = ring_pair(&dir, 64);
        w.write_commit(&[7u8; 64]).unwrap();
        assert_eq!(w.free_space(), 0);
        assert_eq!(r.available(), 64);
    }

    #[test]
    fn test_peek_stops_at_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, mut r) = ring_pair(&dir, 16);
        w.write_commit(&[1u8; 12]).unwrap();
        r.read_advance(12).unwrap();
        w.write_commit(&[2u8; 8]).unwrap();

        assert_eq!(r.read_peek().unwrap(), &[2u8; 4]);
        r.read_advance(4).unwrap();
        assert_eq!(r.read_peek().unwrap(), &[2u8; 4]);
    }

    #[test]
    fn test_staged_bytes_are_invisible_until_published() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, r) = ring_pair(&dir, 32);
        w.stage(b"abcd");
        assert_eq!(w.staged(), 4);
        assert_eq!(w.free_space(), 28);
        assert!(r.read_peek().is_none());
        w.rollback();
        assert_eq!(w.free_space(), 32);
    }

    #[test]
    fn test_bytes_at_copies_across_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, mut r) = ring_pair(&dir, 8);
        w.write_commit(&[0u8; 6]).unwrap();
        r.read_advance(6).unwrap();
        w.write_commit(b"wxyz").unwrap();

        let bytes = r.bytes_at(0, 4).unwrap();
        assert!(matches!(bytes, Cow::Owned(_)));
        assert_eq!(&*bytes, b"wxyz");
        assert!(matches!(r.bytes_at(0, 2).unwrap(), Cow::Borrowed(_)));
        assert!(r.bytes_at(2, 3).is_none());
    }

    #[test]
    fn test_owner_zero_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            posix_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        })
        .unwrap();
        let h = reg
            .attach_or_create(Identity::user(1), 5, 4096, &SegmentOptions::default())
            .unwrap();
        let err = Ring::format(h, 128).unwrap().into_writer(0).err().unwrap();
        assert!(matches!(err, ShmError::InvalidArgument { .. }));
    }
}
