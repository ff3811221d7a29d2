//! Proxy core: registry, router, actors and loopback endpoints.
//!
//! `ProxyCore` is the main entry point. It creates one ring pair per RT actor
//! in the segment registry, starts the router and every actor on their own
//! threads, and tears all of it down again on shutdown.

use crate::actor::{ActorHandle, ActorRings, ActorStats, ProxyActor};
use crate::bus::{Rail, Router, RouterHandle};
use crate::config::{ActorConfig, ProxyConfig};
use crate::error::ProxyError;
use crate::rt::{RtEndpoint, RtHandle, RtStats};
use crate::shutdown::ShutdownToken;
use rtbridge_common::config::ConfigLoader;
use rtbridge_common::shm::consts::RING_HEADER_SIZE;
use rtbridge_shm::{
    Identity, MultiframeReader, MultiframeWriter, Ring, SegmentHandle, SegmentRegistry,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bound on waiting for actors to appear on the command rail.
const SUBSCRIBE_WAIT: Duration = Duration::from_secs(5);

/// Ring direction, as used in segment names.
#[derive(Debug, Clone, Copy)]
enum Direction {
    ToRt,
    FromRt,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Direction::ToRt => "to_rt",
            Direction::FromRt => "from_rt",
        }
    }
}

/// Proxy Core manages the bus, the actors and their rings.
pub struct ProxyCore {
    /// Validated configuration
    config: ProxyConfig,
    /// Segment registry, present once initialized
    registry: Option<SegmentRegistry>,
    /// Command and response rails
    router: Router,
    /// Cancels every worker
    token: ShutdownToken,
    /// Router thread
    router_handle: Option<RouterHandle>,
    /// Actor threads
    actors: Vec<ActorHandle>,
    /// Loopback RT threads
    endpoints: Vec<RtHandle>,
}

impl ProxyCore {
    /// Create a new ProxyCore with the given configuration.
    ///
    /// # Errors
    /// Returns error if configuration validation fails.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        let router = Router::new(&config.bus);

        info!(
            "ProxyCore created for '{}' with {} actor(s)",
            config.shared.service_name,
            config.actors.len()
        );

        Ok(Self {
            config,
            registry: None,
            router,
            token: ShutdownToken::new(),
            router_handle: None,
            actors: Vec::new(),
            endpoints: Vec::new(),
        })
    }

    /// Load proxy configuration from a TOML file.
    pub fn load_config(config_path: &Path) -> Result<ProxyConfig, ProxyError> {
        info!("Loading configuration from {:?}", config_path);
        let config = ProxyConfig::load(config_path)?;
        info!(
            "Loaded config: backend={:?}, {} actor(s)",
            config.registry.backend,
            config.actors.len()
        );
        Ok(config)
    }

    /// Create the registry and rings, then start router, endpoints and actors.
    ///
    /// # Errors
    /// Returns error if called twice or any ring, thread or subscription
    /// cannot be set up. Whatever was started is stopped by [`Self::shutdown`].
    pub fn init(&mut self) -> Result<(), ProxyError> {
        if self.registry.is_some() {
            return Err(ProxyError::InitFailed("already initialized".to_string()));
        }
        info!("Initializing ProxyCore...");

        let registry = SegmentRegistry::new(self.config.registry.to_registry_config())?;
        info!("Segment registry using {:?} backend", registry.backend());
        self.registry = Some(registry.clone());

        self.router_handle = Some(self.router.spawn(self.token.clone())?);

        for actor in self.config.actors.clone() {
            self.start_actor(&registry, &actor)?;
        }

        for actor in &self.config.actors {
            if actor.role_flags().consumes_commands()
                && !self
                    .router
                    .command_rail()
                    .wait_for_subscriber(&actor.name, SUBSCRIBE_WAIT)
            {
                return Err(ProxyError::InitFailed(format!(
                    "actor '{}' did not subscribe within {:?}",
                    actor.name, SUBSCRIBE_WAIT
                )));
            }
        }

        info!(
            "ProxyCore initialized: {} actor(s), {} loopback endpoint(s)",
            self.actors.len(),
            self.endpoints.len()
        );
        Ok(())
    }

    fn start_actor(
        &mut self,
        registry: &SegmentRegistry,
        actor: &ActorConfig,
    ) -> Result<(), ProxyError> {
        let roles = actor.role_flags();
        let owner = Identity::current_process().id;
        let mut rings = ActorRings::default();
        let mut rt_rx: Option<MultiframeReader> = None;
        let mut rt_tx: Option<MultiframeWriter> = None;

        if roles.writes_to_rt() {
            let ring = Ring::format(self.ring_segment(registry, actor, Direction::ToRt)?, actor.ring_capacity)?;
            rings.to_rt = Some(MultiframeWriter::new(ring.into_writer(owner)?));
            if actor.loopback {
                let ring = Ring::open(self.rt_attach(registry, actor, Direction::ToRt)?)?;
                rt_rx = Some(MultiframeReader::new(ring.into_reader(owner)?));
            }
        }
        if roles.reads_from_rt() {
            let ring = Ring::format(self.ring_segment(registry, actor, Direction::FromRt)?, actor.ring_capacity)?;
            rings.from_rt = Some(MultiframeReader::new(ring.into_reader(owner)?));
            if actor.loopback {
                let ring = Ring::open(self.rt_attach(registry, actor, Direction::FromRt)?)?;
                rt_tx = Some(MultiframeWriter::new(ring.into_writer(owner)?));
            }
        }

        match rt_rx {
            Some(rx) => {
                let endpoint = RtEndpoint::new(actor.name.clone(), rx, rt_tx)
                    .spawn(self.token.clone())
                    .map_err(|e| {
                        ProxyError::InitFailed(format!("loopback for '{}': {}", actor.name, e))
                    })?;
                self.endpoints.push(endpoint);
            }
            None if actor.loopback => {
                warn!(
                    "Actor '{}': loopback needs a to-RT ring, none started",
                    actor.name
                );
            }
            None => {}
        }

        let proxy = ProxyActor::new(actor, &self.router, rings, self.token.clone())?;
        self.actors.push(proxy.spawn()?);
        info!("  Started actor '{}' ({:?})", actor.name, roles);
        Ok(())
    }

    /// Registry name of an actor's ring segment.
    pub fn segment_name(&self, actor: &str, to_rt: bool) -> String {
        let dir = if to_rt { Direction::ToRt } else { Direction::FromRt };
        self.segment_name_for(actor, dir)
    }

    fn segment_name_for(&self, actor: &str, dir: Direction) -> String {
        format!("{}.{}.{}", self.config.shared.service_name, actor, dir.suffix())
    }

    fn ring_segment(
        &self,
        registry: &SegmentRegistry,
        actor: &ActorConfig,
        dir: Direction,
    ) -> Result<SegmentHandle, ProxyError> {
        let name = self.segment_name_for(&actor.name, dir);
        let handle = registry.attach_or_create(
            Identity::current_process(),
            name.as_str(),
            RING_HEADER_SIZE + actor.ring_capacity,
            &registry.default_options(),
        )?;
        debug!("ring segment '{}' key={} id={}", name, handle.key(), handle.id());
        Ok(handle)
    }

    fn rt_attach(
        &self,
        registry: &SegmentRegistry,
        actor: &ActorConfig,
        dir: Direction,
    ) -> Result<SegmentHandle, ProxyError> {
        let name = self.segment_name_for(&actor.name, dir);
        let rt = Identity::kernel(Identity::current_process().id);
        Ok(registry.attach(rt, name.as_str())?)
    }

    /// Block until shutdown is requested.
    ///
    /// # Errors
    /// Returns error if the core was not initialized.
    pub fn run(&self) -> Result<(), ProxyError> {
        if self.registry.is_none() {
            return Err(ProxyError::InitFailed("not initialized".to_string()));
        }
        if detect_rt_mode() {
            info!("Running in real-time mode");
        } else {
            info!("Running in standard (non-RT) mode");
        }

        self.token.wait();
        info!("Shutdown requested");
        Ok(())
    }

    /// Stop every worker, release the rings and collect unheld segments.
    pub fn shutdown(&mut self) -> Result<(), ProxyError> {
        self.token.cancel();

        let mut first_error = None;
        for actor in self.actors.drain(..) {
            let name = actor.name().to_string();
            let stats = actor.stats();
            match actor.join() {
                Ok(()) => info!("Actor '{}' final stats: {:?}", name, stats),
                Err(e) => {
                    error!("Actor '{}' exited with error: {}", name, e);
                    first_error.get_or_insert(ProxyError::Actor(e));
                }
            }
        }
        for endpoint in self.endpoints.drain(..) {
            debug!("Loopback '{}' final stats: {:?}", endpoint.name(), endpoint.stats());
            endpoint.join();
        }
        if let Some(router) = self.router_handle.take() {
            router.join();
        }

        if let Some(registry) = self.registry.take() {
            match registry.gc() {
                Ok(freed) => info!("Collected {} unheld segment(s)", freed),
                Err(e) => warn!("Segment collection failed: {}", e),
            }
            if let Ok(left) = registry.list() {
                if !left.is_empty() {
                    info!("{} resident segment(s) remain", left.len());
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Token cancelling every worker, for signal handlers.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Rail carrying commands to actors.
    pub fn command_rail(&self) -> &Rail {
        self.router.command_rail()
    }

    /// Rail carrying replies to clients.
    pub fn response_rail(&self) -> &Rail {
        self.router.response_rail()
    }

    /// Statistics of every running actor.
    pub fn actor_stats(&self) -> Vec<(String, ActorStats)> {
        self.actors
            .iter()
            .map(|a| (a.name().to_string(), a.stats()))
            .collect()
    }

    /// Statistics of every loopback endpoint.
    pub fn rt_stats(&self) -> Vec<(String, RtStats)> {
        self.endpoints
            .iter()
            .map(|e| (e.name().to_string(), e.stats()))
            .collect()
    }

    /// Segment registry, once initialized.
    pub fn registry(&self) -> Option<&SegmentRegistry> {
        self.registry.as_ref()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

impl Drop for ProxyCore {
    fn drop(&mut self) {
        if self.router_handle.is_some() || !self.actors.is_empty() || !self.endpoints.is_empty() {
            if let Err(e) = self.shutdown() {
                warn!("Shutdown on drop: {}", e);
            }
        }
    }
}

/// Detect if running with real-time scheduling.
fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        unsafe {
            let policy = sched_getscheduler(0);
            policy == SCHED_FIFO || policy == SCHED_RR
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleName;

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = ProxyConfig::new("p");
        config.actors.push(ActorConfig::new("", &[RoleName::Echo]));
        assert!(matches!(ProxyCore::new(config), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_segment_names_carry_service_and_direction() {
        let core = ProxyCore::new(ProxyConfig::new("svc")).unwrap();
        assert_eq!(core.segment_name("demo", true), "svc.demo.to_rt");
        assert_eq!(core.segment_name("demo", false), "svc.demo.from_rt");
    }

    #[test]
    fn test_run_before_init_fails() {
        let core = ProxyCore::new(ProxyConfig::new("svc")).unwrap();
        assert!(matches!(core.run(), Err(ProxyError::InitFailed(_))));
    }
}
