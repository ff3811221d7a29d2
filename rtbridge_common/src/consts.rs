//! System-wide constants for the rtbridge workspace.
//!
//! Single source of truth for proxy defaults and default paths.

/// Default proxy configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rtbridge/proxy.toml";

/// Default service name used when logging and naming POSIX segments.
pub const DEFAULT_SERVICE_NAME: &str = "rtproxy";

/// Default ring capacity (bytes) for actor ring pairs.
pub const DEFAULT_RING_CAPACITY: usize = 16 * 1024;

/// Initial backoff delay when waiting on a ring, in microseconds.
pub const DEFAULT_MIN_DELAY_US: u64 = 1_000;

/// Backoff ceiling when waiting on a ring, in microseconds.
pub const DEFAULT_MAX_DELAY_US: u64 = 200_000;

/// Upper bound for one complete wait on the RT side, in milliseconds.
pub const DEFAULT_RT_TIMEOUT_MS: u64 = 5_000;

/// Default bound on registry lock acquisition, in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1_000;
