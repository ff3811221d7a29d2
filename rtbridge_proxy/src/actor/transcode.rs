//! Payload conversion at the RT boundary.
//!
//! Toward RT a wire-form container becomes a `DecodedNative` frame. From RT a
//! `DecodedNative` container frame goes back to wire form. Any other frame
//! passes through untouched.

use rtbridge_common::container::{CONTAINER_SUBTYPE, Container, ContainerError};
use rtbridge_shm::{FrameFlags, FrameType, OwnedFrame};

/// Decode a wire-form container payload into a native frame.
pub fn wire_to_rt(payload: &[u8]) -> Result<OwnedFrame, ContainerError> {
    let native = Container::from_wire(payload)?.to_native()?;
    Ok(OwnedFrame::new(
        FrameFlags::new(FrameType::DecodedNative, CONTAINER_SUBTYPE),
        native,
    ))
}

/// Whether `frame` carries a native container.
pub fn is_native_container(frame: &OwnedFrame) -> bool {
    frame.flags.frametype == FrameType::DecodedNative && frame.flags.subtype == CONTAINER_SUBTYPE
}

/// Convert a native container frame to its wire-form payload.
pub fn rt_to_wire(frame: &OwnedFrame) -> Result<Vec<u8>, ContainerError> {
    Container::from_native(&frame.payload)?.to_wire()
}
