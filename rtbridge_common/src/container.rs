//! Native structured payload exchanged with the RT side.
//!
//! Clients put a [`Container`] on the bus in wire form (JSON). Actors with
//! transcoding enabled decode it and hand the RT side the compact native form
//! (bincode), and convert RT replies back to wire form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame subtype tag carried by frames holding a [`Container`].
pub const CONTAINER_SUBTYPE: u8 = 1;

/// Errors converting a [`Container`] between wire and native form.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Payload is not a valid wire-form container.
    #[error("wire decode failed: {0}")]
    Wire(#[from] serde_json::Error),

    /// Payload is not a valid native-form container.
    #[error("native decode failed: {0}")]
    Native(#[from] bincode::Error),
}

/// Command/reply envelope understood by RT components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Container {
    /// Message type discriminator, interpreted by the RT component.
    #[serde(rename = "type")]
    pub msg_type: u32,

    /// Client-chosen serial number echoed in replies.
    #[serde(default)]
    pub serial: u32,

    /// Whether the sender expects a reply.
    #[serde(default)]
    pub reply_required: bool,

    /// Positional string arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Free-form diagnostic notes (errors, warnings).
    #[serde(default)]
    pub note: Vec<String>,
}

impl Container {
    /// Create a container with the given type and serial.
    pub fn new(msg_type: u32, serial: u32) -> Self {
        Self {
            msg_type,
            serial,
            reply_required: false,
            args: Vec::new(),
            note: Vec::new(),
        }
    }

    /// Decode from wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ContainerError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode to wire form.
    pub fn to_wire(&self) -> Result<Vec<u8>, ContainerError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from native (RT) form.
    pub fn from_native(bytes: &[u8]) -> Result<Self, ContainerError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encode to native (RT) form.
    pub fn to_native(&self) -> Result<Vec<u8>, ContainerError> {
        Ok(bincode::serialize(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_defaults_optional_fields() {
        let c = Container::from_wire(br#"{"type": 7}"#).unwrap();
        assert_eq!(c, Container::new(7, 0));
    }

    #[test]
    fn wire_rejects_non_container_payloads() {
        assert!(Container::from_wire(b"PING").is_err());
        assert!(Container::from_wire(br#"{"type": 1, "bogus": true}"#).is_err());
    }

    #[test]
    fn native_form_is_not_wire_form() {
        let mut c = Container::new(3, 42);
        c.args.push("halcmd".into());
        let native = c.to_native().unwrap();
        assert!(Container::from_wire(&native).is_err());
        assert_eq!(Container::from_native(&native).unwrap(), c);
    }

    #[test]
    fn truncated_native_payload_fails() {
        let native = Container::new(3, 42).to_native().unwrap();
        assert!(Container::from_native(&native[..native.len() - 1]).is_err());
    }
}
