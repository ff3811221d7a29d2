//! Classification of multipart bus messages.

use crate::error::BusError;
use rtbridge_common::bus::{MIN_DATA_PARTS, SUBSCRIBE, UNSUBSCRIBE};

/// A bus message: an ordered list of opaque parts.
pub type Multipart = Vec<Vec<u8>>;

/// A parsed bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// Subscribe the sending peer to a topic.
    Subscribe(Vec<u8>),
    /// Unsubscribe the sending peer from a topic.
    Unsubscribe(Vec<u8>),
    /// Addressed data.
    Data(DataMessage),
}

/// `[from][to][payload...]` as sent by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Originator name
    pub from: Vec<u8>,
    /// Destination topic
    pub to: Vec<u8>,
    /// One or more payload parts
    pub payload: Multipart,
}

impl BusMessage {
    /// Split a raw multipart message into control or data.
    ///
    /// # Errors
    ///
    /// `BusError::Protocol` for an empty message, an unknown control tag or a
    /// data message with fewer than three parts.
    pub fn parse(mut parts: Multipart) -> Result<Self, BusError> {
        if parts.len() == 1 {
            let frame = parts.remove(0);
            return match frame.split_first() {
                Some((&SUBSCRIBE, topic)) => Ok(Self::Subscribe(topic.to_vec())),
                Some((&UNSUBSCRIBE, topic)) => Ok(Self::Unsubscribe(topic.to_vec())),
                Some((tag, _)) => Err(BusError::Protocol(format!(
                    "unknown control tag {tag:#04x}"
                ))),
                None => Err(BusError::Protocol("empty control frame".to_string())),
            };
        }
        if parts.len() < MIN_DATA_PARTS {
            return Err(BusError::Protocol(format!(
                "data message with {} part(s), need at least {MIN_DATA_PARTS}",
                parts.len()
            )));
        }

        let payload = parts.split_off(2);
        let to = parts.pop().unwrap_or_default();
        let from = parts.pop().unwrap_or_default();
        Ok(Self::Data(DataMessage { from, to, payload }))
    }
}

impl DataMessage {
    /// Build a message from its parts.
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>, payload: Multipart) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    /// `[from][to][payload...]`
    pub fn to_parts(&self) -> Multipart {
        let mut parts = Vec::with_capacity(self.payload.len() + 2);
        parts.push(self.from.clone());
        parts.push(self.to.clone());
        parts.extend(self.payload.iter().cloned());
        parts
    }

    /// `[to][from][payload...]`, the shape delivered to subscribers.
    pub fn to_delivery(&self) -> Multipart {
        let mut parts = Vec::with_capacity(self.payload.len() + 2);
        parts.push(self.to.clone());
        parts.push(self.from.clone());
        parts.extend(self.payload.iter().cloned());
        parts
    }
}

/// Lossy text rendering of an address for logs and error replies.
pub fn display_name(bytes: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
