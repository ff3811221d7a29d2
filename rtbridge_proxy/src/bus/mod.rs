//! Topic-addressed in-process bus with a command rail and a response rail.

pub mod message;
pub mod rail;
pub mod router;

pub use message::{BusMessage, DataMessage, Multipart};
pub use rail::{PeerId, Rail, RailSocket, RailStats};
pub use router::{Router, RouterHandle};
