//! # rtbridge Shared Memory
//!
//! Memory shared across the RT boundary, and the message rings laid on it.
//!
//! ## Layers
//!
//! - [`SegmentRegistry`]: a bounded table of named, reference-counted
//!   segments. Memory is freed only after every holder detached.
//! - [`Ring`]: fixed-capacity single-writer/single-reader byte ring placed at
//!   the start of a segment.
//! - [`MultiframeWriter`] / [`MultiframeReader`]: length-prefixed frames with
//!   all-or-nothing message visibility.
//!
//! ```text
//!  non-RT process                      RT context
//! ┌────────────────┐   to-RT ring   ┌────────────────┐
//! │ MultiframeWriter├──────────────►│MultiframeReader│
//! │ MultiframeReader│◄──────────────┤MultiframeWriter│
//! └────────────────┘  from-RT ring  └────────────────┘
//!          ▲                                ▲
//!          └──── SegmentRegistry attach ────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rtbridge_shm::{
//!     Identity, MultiframeReader, MultiframeWriter, OwnedFrame, RegistryConfig, Ring,
//!     SegmentRegistry,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SegmentRegistry::new(RegistryConfig::default())?;
//! let opts = registry.default_options();
//!
//! let ours = registry.attach_or_create(Identity::user(100), "demo.to_rt", 8192, &opts)?;
//! let theirs = registry.attach(Identity::kernel(1), "demo.to_rt")?;
//!
//! let mut tx = MultiframeWriter::new(Ring::format(ours, 4096)?.into_writer(100)?);
//! let mut rx = MultiframeReader::new(Ring::open(theirs)?.into_reader(1)?);
//!
//! tx.write_message(&[OwnedFrame::transparent("PING")])?;
//! let message = rx.read_message()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`ShmResult`]. [`ShmError::kind`] folds variants
//! into the coarse [`ErrorKind`] taxonomy for callers that only decide
//! between retry, fallback and failure.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod frame;
pub mod multiframe;
pub mod registry;
pub mod ring;
pub mod segment;

pub use backend::{BackendChoice, BackendKind, SegmentBackend, page_size};
pub use error::{ErrorKind, ShmError, ShmResult};
pub use frame::{Frame, FrameFlags, FrameHeader, FrameType, OwnedFrame, encoded_size};
pub use multiframe::{MultiframeReader, MultiframeWriter, TxState};
pub use registry::{RegistryConfig, SegmentHandle, SegmentRegistry};
pub use ring::{Ring, RingReader, RingWriter};
pub use segment::{
    AccessPolicy, Identity, Retention, SegmentFlags, SegmentKey, SegmentOptions, SegmentStatus,
    Side,
};
