//! Multi-frame messages on top of a ring
//!
//! A writer transaction moves `Idle -> Writing -> Idle`: [`frame_write`]
//! stages frames without publishing, [`flush`] marks the last one as
//! end-of-message and publishes the whole transaction with one store, and
//! [`abort`] drops everything staged. The reader consumes frames the same way
//! and releases their space with [`read_flush`].
//!
//! [`frame_write`]: MultiframeWriter::frame_write
//! [`flush`]: MultiframeWriter::flush
//! [`abort`]: MultiframeWriter::abort
//! [`read_flush`]: MultiframeReader::read_flush

use crate::error::{ShmError, ShmResult};
use crate::frame::{Frame, FrameFlags, FrameHeader, OwnedFrame, encoded_size};
use crate::ring::{RingReader, RingWriter};
use rtbridge_common::shm::consts::FRAME_HEADER_SIZE;
use tracing::{debug, warn};

/// Writer transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No frames staged.
    Idle,
    /// At least one frame staged, nothing published.
    Writing,
}

/// Frame-level writer over a bound ring.
pub struct MultiframeWriter {
    ring: RingWriter,
    state: TxState,
    last_header: Option<(u32, FrameHeader)>,
    staged_frames: usize,
}

impl MultiframeWriter {
    /// Wrap the writing side of a ring.
    pub fn new(ring: RingWriter) -> Self {
        Self {
            ring,
            state: TxState::Idle,
            last_header: None,
            staged_frames: 0,
        }
    }

    /// Current transaction state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Ring data capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Free ring bytes, net of anything staged.
    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    /// Check that `n` encoded bytes fit right now.
    pub fn reserve(&self, n: usize) -> ShmResult<()> {
        self.ring.write_reserve(n)
    }

    /// Stage one frame. The end-of-message bit in `flags` is ignored; flush
    /// sets it on the last frame.
    pub fn frame_write(&mut self, flags: FrameFlags, payload: &[u8]) -> ShmResult<()> {
        let length = u32::try_from(payload.len())
            .map_err(|_| ShmError::invalid(format!("frame of {} bytes", payload.len())))?;
        self.ring.write_reserve(FRAME_HEADER_SIZE + payload.len())?;

        let header = FrameHeader {
            length,
            flags: FrameFlags {
                end_of_message: false,
                ..flags
            },
        };
        let at = self.ring.stage(&header.encode());
        self.ring.stage(payload);
        self.last_header = Some((at, header));
        self.staged_frames += 1;
        self.state = TxState::Writing;
        Ok(())
    }

    /// Publish every staged frame as one message. No-op when idle.
    pub fn flush(&mut self) -> ShmResult<()> {
        if let Some((at, mut header)) = self.last_header.take() {
            header.flags.end_of_message = true;
            self.ring.patch(at, &header.encode());
            debug!(
                "flush {} frame(s), {} bytes",
                self.staged_frames,
                self.ring.staged()
            );
            self.ring.publish();
        }
        self.staged_frames = 0;
        self.state = TxState::Idle;
        Ok(())
    }

    /// Drop every staged frame. The ring is left exactly as before the
    /// transaction.
    pub fn abort(&mut self) {
        if self.state == TxState::Writing {
            debug!("abort {} staged frame(s)", self.staged_frames);
        }
        self.ring.rollback();
        self.last_header = None;
        self.staged_frames = 0;
        self.state = TxState::Idle;
    }

    /// Write and flush a whole message, or nothing.
    ///
    /// Space for every frame is checked up front, so `WouldBlock` leaves the
    /// ring untouched.
    pub fn write_message(&mut self, frames: &[OwnedFrame]) -> ShmResult<()> {
        if self.state != TxState::Idle {
            return Err(ShmError::invalid("transaction already in progress"));
        }
        if frames.is_empty() {
            return Err(ShmError::invalid("message without frames"));
        }
        self.ring
            .write_reserve(encoded_size(frames.iter().map(|f| f.payload.len())))?;

        for frame in frames {
            if let Err(e) = self.frame_write(frame.flags, &frame.payload) {
                self.abort();
                return Err(e);
            }
        }
        self.flush()
    }
}

/// Frame-level reader over a bound ring.
pub struct MultiframeReader {
    ring: RingReader,
}

impl MultiframeReader {
    /// Wrap the reading side of a ring.
    pub fn new(ring: RingReader) -> Self {
        Self { ring }
    }

    /// Ring data capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Published bytes not yet consumed.
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// The frame at the pending read position, if one is published.
    pub fn frame_read(&self) -> ShmResult<Option<Frame<'_>>> {
        let Some(header) = self.header()? else {
            return Ok(None);
        };
        let payload = self
            .ring
            .bytes_at(FRAME_HEADER_SIZE, header.length as usize)
            .ok_or_else(|| {
                ShmError::protocol(format!(
                    "frame of {} bytes but only {} published",
                    header.length,
                    self.ring.available()
                ))
            })?;
        Ok(Some(Frame {
            flags: header.flags,
            payload,
        }))
    }

    /// Step past the current frame without releasing its space.
    pub fn frame_shift(&mut self) -> ShmResult<()> {
        let header = self
            .header()?
            .ok_or_else(|| ShmError::invalid("no frame to shift"))?;
        self.ring.consume(header.encoded_len())
    }

    /// Release the space of every frame shifted since the last flush.
    pub fn read_flush(&mut self) {
        self.ring.publish();
    }

    /// Rewind to the last flushed position.
    pub fn read_abort(&mut self) {
        if self.ring.consumed() > 0 {
            debug!("read abort, rewinding {} bytes", self.ring.consumed());
        }
        self.ring.rollback();
    }

    /// Drop every published byte past the last flushed position and hand the
    /// space back to the writer. Returns the number of bytes skipped.
    ///
    /// Frames carry no sync marker, so nothing published behind a malformed
    /// header can be trusted.
    pub fn resync(&mut self) -> usize {
        self.ring.rollback();
        let skipped = self.ring.available();
        match self.ring.consume(skipped) {
            Ok(()) => self.ring.publish(),
            Err(e) => warn!("resync of {skipped} bytes failed: {e}"),
        }
        skipped
    }

    /// Read one message: frames up to and including end-of-message, or until
    /// the ring runs dry. Returns `None` when nothing is published.
    ///
    /// A malformed frame is reported once; the reader resyncs past it so the
    /// next call sees only data published afterwards.
    pub fn read_message(&mut self) -> ShmResult<Option<Vec<OwnedFrame>>> {
        let mut frames = Vec::new();
        loop {
            let frame = match self.frame_read() {
                Ok(Some(frame)) => frame.into_owned(),
                Ok(None) => break,
                Err(e) => {
                    let skipped = self.resync();
                    warn!("malformed frame, skipped {skipped} published bytes: {e}");
                    return Err(e);
                }
            };
            let end = frame.flags.end_of_message;
            self.ring
                .consume(FRAME_HEADER_SIZE + frame.payload.len())?;
            frames.push(frame);
            if end {
                break;
            }
        }

        if frames.is_empty() {
            return Ok(None);
        }
        self.read_flush();
        Ok(Some(frames))
    }

    fn header(&self) -> ShmResult<Option<FrameHeader>> {
        let available = self.ring.available();
        if available == 0 {
            return Ok(None);
        }
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        if !self.ring.copy_at(0, &mut raw) {
            return Err(ShmError::protocol(format!(
                "{available} trailing bytes do not hold a frame header"
            )));
        }
        FrameHeader::decode(&raw).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendChoice;
    use crate::frame::FrameType;
    use crate::registry::{RegistryConfig, SegmentRegistry};
    use crate::ring::Ring;
    use crate::segment::{Identity, SegmentOptions};
    use rtbridge_common::shm::consts::RING_HEADER_SIZE;

    fn channel(dir: &tempfile::TempDir, capacity: usize) -> (MultiframeWriter, MultiframeReader) {
        let reg = SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            posix_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        })
        .unwrap();
        let opts = SegmentOptions::default();
        let w = reg
            .attach_or_create(Identity::user(1), 3, RING_HEADER_SIZE + capacity, &opts)
            .unwrap();
        let r = reg.attach(Identity::user(2), 3).unwrap();
        let writer = Ring::format(w, capacity).unwrap().into_writer(1).unwrap();
        let reader = Ring::open(r).unwrap().into_reader(2).unwrap();
        (MultiframeWriter::new(writer), MultiframeReader::new(reader))
    }

    #[test]
    fn test_flush_sets_end_of_message_on_last_frame_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tx, mut rx) = channel(&dir, 256);
        tx.frame_write(FrameFlags::transparent(), b"to").unwrap();
        tx.frame_write(FrameFlags::new(FrameType::Encoded, 1), b"{}")
            .unwrap();
        assert!(rx.frame_read().unwrap().is_none());
        tx.flush().unwrap();

        let first = rx.frame_read().unwrap().unwrap();
        assert!(!first.flags.end_of_message);
        assert_eq!(&*first.payload, b"to");
        rx.frame_shift().unwrap();

        let second = rx.frame_read().unwrap().unwrap();
        assert!(second.flags.end_of_message);
        assert_eq!(second.flags.frametype, FrameType::Encoded);
        rx.frame_shift().unwrap();
        rx.read_flush();
        assert_eq!(tx.free_space(), 256);
    }

    #[test]
    fn test_back_to_back_messages_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tx, mut rx) = channel(&dir, 256);
        tx.write_message(&[OwnedFrame::transparent("a"), OwnedFrame::transparent("b")])
            .unwrap();
        tx.write_message(&[OwnedFrame::transparent("c")]).unwrap();

        let first = rx.read_message().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = rx.read_message().unwrap().unwrap();
        assert_eq!(second[0].payload, b"c");
        assert!(rx.read_message().unwrap().is_none());
    }

    #[test]
    fn test_read_abort_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tx, mut rx) = channel(&dir, 128);
        tx.write_message(&[OwnedFrame::transparent("x"), OwnedFrame::transparent("y")])
            .unwrap();

        rx.frame_shift().unwrap();
        rx.read_abort();
        let again = rx.frame_read().unwrap().unwrap();
        assert_eq!(&*again.payload, b"x");
    }

    #[test]
    fn test_write_message_checks_total_size_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tx, rx) = channel(&dir, 64);
        let frames = [
            OwnedFrame::transparent(vec![1u8; 20]),
            OwnedFrame::transparent(vec![2u8; 20]),
        ];
        // 2 * (8 + 20) = 56 fits; a third frame would not.
        tx.write_message(&frames).unwrap();
        let err = tx.write_message(&frames).unwrap_err();
        assert!(matches!(err, ShmError::WouldBlock { needed: 56, free: 8 }));
        assert_eq!(tx.state(), TxState::Idle);
        assert_eq!(rx.available(), 56);
    }

    #[test]
    fn test_malformed_frame_is_skipped_once() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            posix_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        })
        .unwrap();
        let opts = SegmentOptions::default();
        let w = reg
            .attach_or_create(Identity::user(1), 4, RING_HEADER_SIZE + 128, &opts)
            .unwrap();
        let r = reg.attach(Identity::user(2), 4).unwrap();
        let mut raw = Ring::format(w, 128).unwrap().into_writer(1).unwrap();
        let mut rx = MultiframeReader::new(Ring::open(r).unwrap().into_reader(2).unwrap());

        // Reserved flag bits set.
        let mut bad = Vec::new();
        bad.extend_from_slice(&3u32.to_ne_bytes());
        bad.extend_from_slice(&0x8000_0000u32.to_ne_bytes());
        bad.extend_from_slice(b"abc");
        raw.write_commit(&bad).unwrap();

        let err = rx.read_message().unwrap_err();
        assert!(matches!(err, ShmError::Protocol { .. }));
        assert_eq!(rx.available(), 0);
        assert_eq!(raw.free_space(), 128);
        assert!(rx.read_message().unwrap().is_none());

        let mut tx = MultiframeWriter::new(raw);
        tx.write_message(&[OwnedFrame::transparent("ok")]).unwrap();
        assert_eq!(rx.read_message().unwrap().unwrap()[0].payload, b"ok");
    }

    #[test]
    fn test_frame_payload_straddling_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tx, mut rx) = channel(&dir, 64);
        tx.write_message(&[OwnedFrame::transparent(vec![0u8; 40])])
            .unwrap();
        rx.read_message().unwrap().unwrap();

        let payload: Vec<u8> = (0..30).collect();
        tx.write_message(&[OwnedFrame::transparent(payload.clone())])
            .unwrap();
        let msg = rx.read_message().unwrap().unwrap();
        assert_eq!(msg[0].payload, payload);
    }
}
