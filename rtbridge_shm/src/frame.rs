//! Frame header codec
//!
//! Each frame in a ring is an 8-byte header followed by its payload:
//!
//! | bytes | field                                            |
//! |-------|--------------------------------------------------|
//! | 0..4  | payload length (`u32`, native endian)            |
//! | 4..8  | flags (`u32`, native endian)                     |
//!
//! Flags: byte 0 frame type, byte 1 subtype, byte 2 bit 0 end-of-message,
//! remaining bits reserved and written as zero.

use crate::error::{ShmError, ShmResult};
use rtbridge_common::shm::consts::FRAME_HEADER_SIZE;
use std::borrow::Cow;

const EOM_BIT: u32 = 1 << 16;
const KNOWN_BITS: u32 = 0xffff | EOM_BIT;

/// How a frame's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FrameType {
    /// Opaque bytes passed through untouched.
    #[default]
    Transparent = 0,
    /// Structured payload in wire form.
    Encoded = 1,
    /// Structured payload in native form.
    DecodedNative = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = ShmError;

    fn try_from(value: u8) -> ShmResult<Self> {
        match value {
            0 => Ok(FrameType::Transparent),
            1 => Ok(FrameType::Encoded),
            2 => Ok(FrameType::DecodedNative),
            other => Err(ShmError::protocol(format!("unknown frame type {other}"))),
        }
    }
}

/// Per-frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// Payload encoding
    pub frametype: FrameType,
    /// Payload subtype tag, interpreted by the endpoints
    pub subtype: u8,
    /// Last frame of its message. Set by the channel on flush.
    pub end_of_message: bool,
}

impl FrameFlags {
    /// Flags for an opaque frame.
    pub const fn transparent() -> Self {
        Self {
            frametype: FrameType::Transparent,
            subtype: 0,
            end_of_message: false,
        }
    }

    /// Flags with the given type and subtype.
    pub const fn new(frametype: FrameType, subtype: u8) -> Self {
        Self {
            frametype,
            subtype,
            end_of_message: false,
        }
    }

    /// Pack into the header word.
    pub fn to_wire(self) -> u32 {
        let mut word = u32::from(self.frametype as u8) | (u32::from(self.subtype) << 8);
        if self.end_of_message {
            word |= EOM_BIT;
        }
        word
    }

    /// Unpack a header word.
    pub fn from_wire(word: u32) -> ShmResult<Self> {
        if word & !KNOWN_BITS != 0 {
            return Err(ShmError::protocol(format!(
                "reserved frame flag bits set: {word:#010x}"
            )));
        }
        Ok(Self {
            frametype: FrameType::try_from((word & 0xff) as u8)?,
            subtype: ((word >> 8) & 0xff) as u8,
            end_of_message: word & EOM_BIT != 0,
        })
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub length: u32,
    /// Flags
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Serialize to the in-ring layout.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..4].copy_from_slice(&self.length.to_ne_bytes());
        out[4..].copy_from_slice(&self.flags.to_wire().to_ne_bytes());
        out
    }

    /// Parse the in-ring layout.
    pub fn decode(raw: &[u8; FRAME_HEADER_SIZE]) -> ShmResult<Self> {
        let length = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let flags = u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(Self {
            length,
            flags: FrameFlags::from_wire(flags)?,
        })
    }

    /// Header plus payload size.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }
}

/// A frame read from a ring. The payload borrows ring memory when it is
/// contiguous there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Flags from the header
    pub flags: FrameFlags,
    /// Payload bytes
    pub payload: Cow<'a, [u8]>,
}

impl Frame<'_> {
    /// Detach from ring memory.
    pub fn into_owned(self) -> OwnedFrame {
        OwnedFrame {
            flags: self.flags,
            payload: self.payload.into_owned(),
        }
    }
}

/// A frame that owns its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    /// Flags
    pub flags: FrameFlags,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl OwnedFrame {
    /// Opaque frame.
    pub fn transparent(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            flags: FrameFlags::transparent(),
            payload: payload.into(),
        }
    }

    /// Frame with explicit flags.
    pub fn new(flags: FrameFlags, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            flags,
            payload: payload.into(),
        }
    }
}

/// Bytes a sequence of payloads occupies in a ring, headers included.
pub fn encoded_size<I>(payload_lens: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    payload_lens
        .into_iter()
        .map(|len| FRAME_HEADER_SIZE + len)
        .sum()
}
