//! Error types for the proxy.

use rtbridge_common::config::ConfigError;
use rtbridge_shm::ShmError;
use thiserror::Error;

/// Bus-level failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// The router side of a rail is gone.
    #[error("rail '{rail}' disconnected")]
    Disconnected {
        /// Rail name
        rail: String,
    },

    /// Message does not follow the bus wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Router thread could not be started.
    #[error("failed to spawn router: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures of a proxy actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Ring operation failed.
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),

    /// Bus operation failed.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// A role needs a ring the actor was not given.
    #[error("actor '{actor}' needs a {ring} ring")]
    MissingRing {
        /// Actor name
        actor: String,
        /// "to-RT" or "from-RT"
        ring: &'static str,
    },

    /// Worker thread could not be started.
    #[error("failed to spawn actor thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Worker thread panicked.
    #[error("actor '{actor}' panicked")]
    Panicked {
        /// Actor name
        actor: String,
    },
}

/// Top-level proxy errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// Segment registry or ring failure.
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),

    /// Bus failure.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Actor failure.
    #[error("actor: {0}")]
    Actor(#[from] ActorError),

    /// Startup sequencing error.
    #[error("initialization failed: {0}")]
    InitFailed(String),
}
