//! Proxy actors: bus participants bridging to an RT ring pair.

pub mod backoff;
pub mod proxy;
pub mod transcode;

pub use backoff::Backoff;
pub use proxy::{ActorHandle, ActorRings, ProxyActor};

use crate::config::RoleName;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

bitflags! {
    /// Behaviour switches of one actor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActorRoles: u32 {
        /// Reply with the received message
        const ECHO = 1 << 0;
        /// Full round trip through the RT rings
        const RESPONDER = 1 << 1;
        /// Publish messages originating on the RT side
        const PUBLISHER = 1 << 2;
        /// Forward commands to RT, no reply
        const SUBSCRIBER = 1 << 3;
        /// Forward commands to RT tagged with the originator
        const INJECTOR = 1 << 4;
        /// Log every frame crossing the boundary
        const TRACE = 1 << 8;
        /// Convert containers between wire and native form
        const TRANSCODE = 1 << 9;

        /// Roles that use an RT ring
        const RT_ROLES = Self::RESPONDER.bits()
            | Self::PUBLISHER.bits()
            | Self::SUBSCRIBER.bits()
            | Self::INJECTOR.bits();
        /// Roles that take commands from the bus
        const CONSUMERS = Self::ECHO.bits()
            | Self::RESPONDER.bits()
            | Self::SUBSCRIBER.bits()
            | Self::INJECTOR.bits();
    }
}

impl ActorRoles {
    /// Needs the to-RT ring.
    pub fn writes_to_rt(self) -> bool {
        self.intersects(Self::RESPONDER | Self::SUBSCRIBER | Self::INJECTOR)
    }

    /// Needs the from-RT ring.
    pub fn reads_from_rt(self) -> bool {
        self.intersects(Self::RESPONDER | Self::PUBLISHER)
    }

    /// Subscribes to its own name on the command rail.
    pub fn consumes_commands(self) -> bool {
        self.intersects(Self::CONSUMERS)
    }
}

impl From<RoleName> for ActorRoles {
    fn from(role: RoleName) -> Self {
        match role {
            RoleName::Echo => Self::ECHO,
            RoleName::Responder => Self::RESPONDER,
            RoleName::Publisher => Self::PUBLISHER,
            RoleName::Subscriber => Self::SUBSCRIBER,
            RoleName::Injector => Self::INJECTOR,
        }
    }
}

/// Where an actor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    /// Not started or between cycles
    Idle = 0,
    /// Waiting for a bus command
    WaitForCommand = 1,
    /// Waiting for room in the to-RT ring
    WaitForToRtSpace = 2,
    /// Writing frames to RT
    WritingToRt = 3,
    /// Waiting for the RT reply
    WaitForRtResponse = 4,
    /// Worker exited
    Stopped = 5,
}

impl ActorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::WaitForCommand,
            2 => Self::WaitForToRtSpace,
            3 => Self::WritingToRt,
            4 => Self::WaitForRtResponse,
            5 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Counters shared between the worker and observers.
#[derive(Debug, Default)]
pub(crate) struct ActorCounters {
    state: AtomicU8,
    pub(crate) frames_tx: AtomicU64,
    pub(crate) frames_rx: AtomicU64,
    pub(crate) ring_tx_fail: AtomicU64,
    pub(crate) decode_fail: AtomicU64,
    pub(crate) frame_errors: AtomicU64,
    pub(crate) messages_in: AtomicU64,
    pub(crate) messages_out: AtomicU64,
    pub(crate) current_delay_us: AtomicU64,
}

impl ActorCounters {
    pub(crate) fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ActorStats {
        ActorStats {
            state: ActorState::from_u8(self.state.load(Ordering::Relaxed)),
            frames_tx: self.frames_tx.load(Ordering::Relaxed),
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
            ring_tx_fail: self.ring_tx_fail.load(Ordering::Relaxed),
            decode_fail: self.decode_fail.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            current_delay: Duration::from_micros(self.current_delay_us.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorStats {
    /// Cycle position
    pub state: ActorState,
    /// Frames written to RT
    pub frames_tx: u64,
    /// Frames read from RT
    pub frames_rx: u64,
    /// Space waits that timed out or writes that failed
    pub ring_tx_fail: u64,
    /// Payloads that could not be transcoded
    pub decode_fail: u64,
    /// Malformed RT messages skipped
    pub frame_errors: u64,
    /// Bus messages taken from the command rail
    pub messages_in: u64,
    /// Bus messages published on the response rail
    pub messages_out: u64,
    /// Delay of the last backoff sleep
    pub current_delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_needs_by_role() {
        assert!(!ActorRoles::ECHO.writes_to_rt() && !ActorRoles::ECHO.reads_from_rt());
        assert!(ActorRoles::RESPONDER.writes_to_rt() && ActorRoles::RESPONDER.reads_from_rt());
        assert!(!ActorRoles::PUBLISHER.consumes_commands());
        assert!(ActorRoles::INJECTOR.writes_to_rt() && !ActorRoles::INJECTOR.reads_from_rt());
    }

    #[test]
    fn test_roles_collect_from_names() {
        let roles: ActorRoles = [RoleName::Publisher, RoleName::Injector]
            .into_iter()
            .map(ActorRoles::from)
            .collect();
        assert_eq!(roles, ActorRoles::PUBLISHER | ActorRoles::INJECTOR);
    }

    #[test]
    fn test_state_round_trips_through_counters() {
        let counters = ActorCounters::default();
        assert_eq!(counters.snapshot().state, ActorState::Idle);
        counters.set_state(ActorState::WaitForRtResponse);
        assert_eq!(counters.snapshot().state, ActorState::WaitForRtResponse);
    }
}
