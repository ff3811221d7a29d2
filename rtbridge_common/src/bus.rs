//! Bus wire protocol constants.
//!
//! A bus message is a list of parts. Two shapes exist on a rail:
//!
//! - control frame: one part, `[tag][topic bytes...]` with no delimiter
//! - data message: `[from][to][payload...]`, at least three parts

/// Control tag: subscribe the sending peer to the topic that follows.
pub const SUBSCRIBE: u8 = 0x01;

/// Control tag: unsubscribe the sending peer from the topic that follows.
pub const UNSUBSCRIBE: u8 = 0x00;

/// Minimum number of parts in a data message.
pub const MIN_DATA_PARTS: usize = 3;

/// Default name of the rail carrying client commands to actors.
pub const COMMAND_RAIL: &str = "command";

/// Default name of the rail carrying replies back to clients.
pub const RESPONSE_RAIL: &str = "response";

/// Text prefix of the synthesized reply for an unknown destination.
pub const NO_SUCH_DESTINATION: &str = "no such destination";

/// Build a subscribe control frame for `topic`.
pub fn subscribe_frame(topic: &str) -> Vec<u8> {
    control_frame(SUBSCRIBE, topic)
}

/// Build an unsubscribe control frame for `topic`.
pub fn unsubscribe_frame(topic: &str) -> Vec<u8> {
    control_frame(UNSUBSCRIBE, topic)
}

fn control_frame(tag: u8, topic: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(topic.len() + 1);
    frame.push(tag);
    frame.extend_from_slice(topic.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_have_no_delimiter() {
        assert_eq!(subscribe_frame("echo"), b"\x01echo");
        assert_eq!(unsubscribe_frame("echo"), b"\x00echo");
    }

    #[test]
    fn rails_are_distinct() {
        assert_ne!(COMMAND_RAIL, RESPONSE_RAIL);
    }
}
