//! Proxy configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "rtproxy"
//! log_level = "info"
//!
//! [registry]
//! backend = "auto"
//! max_segments = 100
//! lock_timeout_ms = 1000
//!
//! [bus]
//! command_rail = "command"
//! response_rail = "response"
//!
//! [[actors]]
//! name = "echo"
//! roles = ["echo"]
//!
//! [[actors]]
//! name = "demo"
//! roles = ["responder"]
//! transcode = true
//! loopback = true
//! ```

use crate::actor::ActorRoles;
use rtbridge_common::bus::{COMMAND_RAIL, RESPONSE_RAIL};
use rtbridge_common::config::{ConfigError, SharedConfig};
use rtbridge_common::consts::{
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_DELAY_US, DEFAULT_MIN_DELAY_US, DEFAULT_RING_CAPACITY,
    DEFAULT_RT_TIMEOUT_MS, DEFAULT_SERVICE_NAME,
};
use rtbridge_common::shm::consts::{
    DEFAULT_MAX_SEGMENTS, POSIX_SHM_PREFIX, RING_MAX_CAPACITY, SHM_MAX_SIZE,
};
use rtbridge_shm::{BackendChoice, RegistryConfig, Retention};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Complete proxy configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Common settings
    pub shared: SharedConfig,

    /// Segment registry settings
    #[serde(default)]
    pub registry: RegistrySection,

    /// Bus settings
    #[serde(default)]
    pub bus: BusSection,

    /// Actors to start
    #[serde(default)]
    pub actors: Vec<ActorConfig>,
}

/// `[registry]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Backend selection
    pub backend: BackendChoice,
    /// Table slots
    pub max_segments: usize,
    /// Largest segment in bytes
    pub max_segment_size: usize,
    /// Registry lock timeout
    pub lock_timeout_ms: u64,
    /// Retention of ring segments
    pub default_retention: Retention,
    /// Directory for POSIX segment files
    pub posix_dir: PathBuf,
    /// File prefix for POSIX segment files
    pub posix_prefix: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_segment_size: SHM_MAX_SIZE,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            default_retention: Retention::CollectOnLastDetach,
            posix_dir: PathBuf::from("/dev/shm"),
            posix_prefix: POSIX_SHM_PREFIX.to_string(),
        }
    }
}

impl RegistrySection {
    /// Registry construction parameters.
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            backend: self.backend,
            max_segments: self.max_segments,
            max_segment_size: self.max_segment_size,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            default_retention: self.default_retention,
            posix_dir: self.posix_dir.clone(),
            posix_prefix: self.posix_prefix.clone(),
        }
    }
}

/// `[bus]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Rail carrying commands to actors
    pub command_rail: String,
    /// Rail carrying replies to clients
    pub response_rail: String,
    /// Messages buffered per rail monitor before copies are dropped
    pub monitor_depth: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            command_rail: COMMAND_RAIL.to_string(),
            response_rail: RESPONSE_RAIL.to_string(),
            monitor_depth: 1024,
        }
    }
}

/// Actor role names as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    /// Reply with the received message
    Echo,
    /// Round trip through the RT rings
    Responder,
    /// Publish RT-originated messages
    Publisher,
    /// Forward commands to RT without reply
    Subscriber,
    /// Like subscriber, tagging the originator
    Injector,
}

/// One `[[actors]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Unique actor name; also its bus topic
    pub name: String,

    /// Roles
    pub roles: Vec<RoleName>,

    /// Log every frame crossing the RT boundary
    #[serde(default)]
    pub trace: bool,

    /// Convert structured payloads between wire and native form
    #[serde(default)]
    pub transcode: bool,

    /// Data capacity of each ring in bytes
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Initial poll delay
    #[serde(default = "default_min_delay_us")]
    pub min_delay_us: u64,

    /// Poll delay ceiling
    #[serde(default = "default_max_delay_us")]
    pub max_delay_us: u64,

    /// Bound on each wait for ring space or an RT reply
    #[serde(default = "default_rt_timeout_ms")]
    pub rt_timeout_ms: u64,

    /// Serve the rings with an in-process loopback RT endpoint
    #[serde(default)]
    pub loopback: bool,
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_min_delay_us() -> u64 {
    DEFAULT_MIN_DELAY_US
}

fn default_max_delay_us() -> u64 {
    DEFAULT_MAX_DELAY_US
}

fn default_rt_timeout_ms() -> u64 {
    DEFAULT_RT_TIMEOUT_MS
}

impl ActorConfig {
    /// Actor with the given roles and defaults elsewhere.
    pub fn new(name: impl Into<String>, roles: &[RoleName]) -> Self {
        Self {
            name: name.into(),
            roles: roles.to_vec(),
            trace: false,
            transcode: false,
            ring_capacity: DEFAULT_RING_CAPACITY,
            min_delay_us: DEFAULT_MIN_DELAY_US,
            max_delay_us: DEFAULT_MAX_DELAY_US,
            rt_timeout_ms: DEFAULT_RT_TIMEOUT_MS,
            loopback: false,
        }
    }

    /// Role flags.
    pub fn role_flags(&self) -> ActorRoles {
        let mut roles = self.roles.iter().map(|r| ActorRoles::from(*r)).collect::<ActorRoles>();
        if self.trace {
            roles |= ActorRoles::TRACE;
        }
        if self.transcode {
            roles |= ActorRoles::TRANSCODE;
        }
        roles
    }

    /// Initial poll delay.
    pub fn min_delay(&self) -> Duration {
        Duration::from_micros(self.min_delay_us)
    }

    /// Poll delay ceiling.
    pub fn max_delay(&self) -> Duration {
        Duration::from_micros(self.max_delay_us)
    }

    /// Wait bound.
    pub fn rt_timeout(&self) -> Duration {
        Duration::from_millis(self.rt_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.name.trim().is_empty() {
            return fail("actor name cannot be empty".to_string());
        }
        if self.roles.is_empty() {
            return fail(format!("actor '{}' has no roles", self.name));
        }

        let roles = self.role_flags();
        if roles.contains(ActorRoles::ECHO) && roles.intersects(ActorRoles::RT_ROLES) {
            return fail(format!("actor '{}': echo excludes other roles", self.name));
        }
        if roles.contains(ActorRoles::RESPONDER)
            && roles.intersects(ActorRoles::PUBLISHER | ActorRoles::SUBSCRIBER | ActorRoles::INJECTOR)
        {
            return fail(format!(
                "actor '{}': responder owns both rings and excludes publisher, subscriber and injector",
                self.name
            ));
        }
        if roles.intersects(ActorRoles::RT_ROLES)
            && (self.ring_capacity == 0 || self.ring_capacity > RING_MAX_CAPACITY)
        {
            return fail(format!(
                "actor '{}': ring_capacity {} out of range",
                self.name, self.ring_capacity
            ));
        }
        if self.min_delay_us == 0 || self.min_delay_us > self.max_delay_us {
            return fail(format!(
                "actor '{}': need 0 < min_delay_us <= max_delay_us",
                self.name
            ));
        }
        if self.rt_timeout_ms == 0 {
            return fail(format!("actor '{}': rt_timeout_ms must be positive", self.name));
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl ProxyConfig {
    /// Minimal configuration with no actors.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            shared: SharedConfig {
                log_level: Default::default(),
                service_name: service_name.into(),
            },
            registry: RegistrySection::default(),
            bus: BusSection::default(),
            actors: Vec::new(),
        }
    }

    /// Semantic validation beyond what parsing enforces.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.registry.max_segments == 0 {
            return Err(ConfigError::ValidationError(
                "registry.max_segments must be positive".to_string(),
            ));
        }
        if self.bus.command_rail == self.bus.response_rail {
            return Err(ConfigError::ValidationError(format!(
                "bus rails must differ (both '{}')",
                self.bus.command_rail
            )));
        }

        let mut names = HashSet::new();
        for actor in &self.actors {
            actor.validate()?;
            if !names.insert(actor.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate actor name: {}",
                    actor.name
                )));
            }
        }
        Ok(())
    }
}
