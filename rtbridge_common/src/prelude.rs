//! Prelude module for common re-exports.
//!
//! ```rust
//! use rtbridge_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Native payloads ────────────────────────────────────────────────
pub use crate::container::{CONTAINER_SUBTYPE, Container, ContainerError};

// ─── Bus wire protocol ──────────────────────────────────────────────
pub use crate::bus::{COMMAND_RAIL, MIN_DATA_PARTS, RESPONSE_RAIL, SUBSCRIBE, UNSUBSCRIBE};

// ─── Shared memory layout ───────────────────────────────────────────
pub use crate::shm::consts::{FRAME_HEADER_SIZE, RING_HEADER_SIZE};

/// Default initial backoff delay as Duration.
pub const DEFAULT_MIN_DELAY: Duration =
    Duration::from_micros(crate::consts::DEFAULT_MIN_DELAY_US);

/// Default backoff ceiling as Duration.
pub const DEFAULT_MAX_DELAY: Duration =
    Duration::from_micros(crate::consts::DEFAULT_MAX_DELAY_US);
