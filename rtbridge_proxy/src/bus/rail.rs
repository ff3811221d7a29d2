//! One forwarding rail: an event channel into the router, a delivery channel
//! per connected peer, and a monitor tap.

use super::message::Multipart;
use crate::error::BusError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, select};
use parking_lot::RwLock;
use rtbridge_common::bus::{subscribe_frame, unsubscribe_frame};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Router-assigned peer number, unique per rail.
pub type PeerId = u64;

/// Topic to subscribed peers.
pub(crate) type Topics = HashMap<Vec<u8>, HashSet<PeerId>>;

/// What a peer tells the router.
pub(crate) enum RailEvent {
    Join {
        peer: PeerId,
        deliver: Sender<Multipart>,
    },
    Leave {
        peer: PeerId,
    },
    Message {
        peer: PeerId,
        parts: Multipart,
    },
}

#[derive(Default)]
pub(crate) struct RailCounters {
    pub(crate) forwarded: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) errors_synthesized: AtomicU64,
    pub(crate) protocol_errors: AtomicU64,
    pub(crate) control: AtomicU64,
    pub(crate) monitor_overflow: AtomicU64,
}

/// Per-rail router statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RailStats {
    /// Data messages delivered to at least one subscriber
    pub forwarded: u64,
    /// Data messages with no subscriber, dropped
    pub dropped: u64,
    /// Error replies generated for unknown destinations
    pub errors_synthesized: u64,
    /// Malformed messages discarded
    pub protocol_errors: u64,
    /// Subscribe/unsubscribe frames applied
    pub control: u64,
    /// Monitor copies lost because the tap was full
    pub monitor_overflow: u64,
}

struct Shared {
    name: String,
    next_peer: AtomicU64,
    counters: RailCounters,
    topics: RwLock<Topics>,
    monitor_tx: Sender<Multipart>,
    monitor_rx: Receiver<Multipart>,
}

/// Cloneable handle to a rail.
#[derive(Clone)]
pub struct Rail {
    shared: Arc<Shared>,
    events_tx: Sender<RailEvent>,
    events_rx: Receiver<RailEvent>,
}

impl Rail {
    /// New rail whose monitor buffers up to `monitor_depth` messages.
    pub fn new(name: impl Into<String>, monitor_depth: usize) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (monitor_tx, monitor_rx) = crossbeam_channel::bounded(monitor_depth.max(1));
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                next_peer: AtomicU64::new(1),
                counters: RailCounters::default(),
                topics: RwLock::new(Topics::new()),
                monitor_tx,
                monitor_rx,
            }),
            events_tx,
            events_rx,
        }
    }

    /// Rail name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Connect a new peer.
    pub fn connect(&self) -> Result<RailSocket, BusError> {
        let peer = self.shared.next_peer.fetch_add(1, Ordering::Relaxed);
        let (deliver, inbox) = crossbeam_channel::unbounded();
        self.events_tx
            .send(RailEvent::Join { peer, deliver })
            .map_err(|_| self.disconnected())?;
        Ok(RailSocket {
            rail: self.shared.name.clone(),
            peer,
            events: self.events_tx.clone(),
            inbox,
        })
    }

    /// Tap receiving a copy of every accepted data message as it was sent.
    pub fn monitor(&self) -> Receiver<Multipart> {
        self.shared.monitor_rx.clone()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> RailStats {
        let c = &self.shared.counters;
        RailStats {
            forwarded: c.forwarded.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            errors_synthesized: c.errors_synthesized.load(Ordering::Relaxed),
            protocol_errors: c.protocol_errors.load(Ordering::Relaxed),
            control: c.control.load(Ordering::Relaxed),
            monitor_overflow: c.monitor_overflow.load(Ordering::Relaxed),
        }
    }

    /// Whether any peer is subscribed to `topic`.
    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.shared
            .topics
            .read()
            .get(topic.as_bytes())
            .is_some_and(|peers| !peers.is_empty())
    }

    /// Currently subscribed topics.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .topics
            .read()
            .keys()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect();
        names.sort();
        names
    }

    /// Poll until `topic` has a subscriber. Returns `false` on timeout.
    pub fn wait_for_subscriber(&self, topic: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_subscribers(topic) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub(crate) fn events(&self) -> &Receiver<RailEvent> {
        &self.events_rx
    }

    pub(crate) fn counters(&self) -> &RailCounters {
        &self.shared.counters
    }

    pub(crate) fn topics_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Topics> {
        self.shared.topics.write()
    }

    pub(crate) fn tap(&self, parts: Multipart) {
        if let Err(TrySendError::Full(_)) = self.shared.monitor_tx.try_send(parts) {
            self.shared
                .counters
                .monitor_overflow
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn disconnected(&self) -> BusError {
        BusError::Disconnected {
            rail: self.shared.name.clone(),
        }
    }
}

impl std::fmt::Debug for Rail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rail")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A peer's connection to one rail. Dropping it leaves the rail and drops
/// every subscription it held.
pub struct RailSocket {
    rail: String,
    peer: PeerId,
    events: Sender<RailEvent>,
    inbox: Receiver<Multipart>,
}

impl RailSocket {
    /// Router-assigned peer number.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Name of the rail this socket is connected to.
    pub fn rail(&self) -> &str {
        &self.rail
    }

    /// Send a raw multipart message.
    pub fn send(&self, parts: Multipart) -> Result<(), BusError> {
        self.events
            .send(RailEvent::Message {
                peer: self.peer,
                parts,
            })
            .map_err(|_| self.disconnected())
    }

    /// Send `[from][to][payload...]`.
    pub fn send_data(&self, from: &[u8], to: &[u8], payload: &[&[u8]]) -> Result<(), BusError> {
        let mut parts = Vec::with_capacity(payload.len() + 2);
        parts.push(from.to_vec());
        parts.push(to.to_vec());
        parts.extend(payload.iter().map(|p| p.to_vec()));
        self.send(parts)
    }

    /// Subscribe to `topic`.
    pub fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        debug!("[{}] peer {} subscribe '{}'", self.rail, self.peer, topic);
        self.send(vec![subscribe_frame(topic)])
    }

    /// Unsubscribe from `topic`.
    pub fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        debug!("[{}] peer {} unsubscribe '{}'", self.rail, self.peer, topic);
        self.send(vec![unsubscribe_frame(topic)])
    }

    /// Wait up to `timeout` for a delivered message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Multipart>, BusError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(parts) => Ok(Some(parts)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Wait up to `timeout` for a delivered message, giving up as soon as
    /// `cancel` disconnects.
    pub fn recv_until(
        &self,
        cancel: &Receiver<()>,
        timeout: Duration,
    ) -> Result<Option<Multipart>, BusError> {
        select! {
            recv(self.inbox) -> parts => parts.map(Some).map_err(|_| self.disconnected()),
            recv(cancel) -> _ => Ok(None),
            default(timeout) => Ok(None),
        }
    }

    /// Take a delivered message if one is queued.
    pub fn try_recv(&self) -> Result<Option<Multipart>, BusError> {
        match self.inbox.try_recv() {
            Ok(parts) => Ok(Some(parts)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Delivery channel, for use in `select!`.
    pub fn inbox(&self) -> &Receiver<Multipart> {
        &self.inbox
    }

    fn disconnected(&self) -> BusError {
        BusError::Disconnected {
            rail: self.rail.clone(),
        }
    }
}

impl Drop for RailSocket {
    fn drop(&mut self) {
        let _ = self.events.send(RailEvent::Leave { peer: self.peer });
    }
}

impl std::fmt::Debug for RailSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RailSocket")
            .field("rail", &self.rail)
            .field("peer", &self.peer)
            .finish()
    }
}
