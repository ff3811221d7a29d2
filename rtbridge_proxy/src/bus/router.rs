//! Two-rail router thread.
//!
//! Every event of both rails is handled on one thread, so subscription state
//! needs no further coordination. A data message for an unknown destination
//! on the command rail turns into an error reply routed on the response rail;
//! on the response rail it is dropped.

use super::message::{BusMessage, DataMessage, Multipart, display_name};
use super::rail::{PeerId, Rail, RailEvent};
use crate::config::BusSection;
use crate::error::BusError;
use crate::shutdown::ShutdownToken;
use crossbeam_channel::{Sender, select};
use rtbridge_common::bus::NO_SUCH_DESTINATION;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Owner of the command and response rails.
#[derive(Debug, Clone)]
pub struct Router {
    command: Rail,
    response: Rail,
}

impl Router {
    /// Rails named per `bus`.
    pub fn new(bus: &BusSection) -> Self {
        Self {
            command: Rail::new(bus.command_rail.clone(), bus.monitor_depth),
            response: Rail::new(bus.response_rail.clone(), bus.monitor_depth),
        }
    }

    /// Rail carrying commands to actors.
    pub fn command_rail(&self) -> &Rail {
        &self.command
    }

    /// Rail carrying replies to clients.
    pub fn response_rail(&self) -> &Rail {
        &self.response
    }

    /// Start the router thread. It runs until `token` is cancelled.
    pub fn spawn(&self, token: ShutdownToken) -> Result<RouterHandle, BusError> {
        let mut core = RouterCore {
            command: RailState::new(self.command.clone()),
            response: RailState::new(self.response.clone()),
        };
        let handle = thread::Builder::new()
            .name("rtbridge-router".to_string())
            .spawn(move || core.run(&token))?;
        Ok(RouterHandle { handle })
    }
}

/// Join handle of the router thread.
pub struct RouterHandle {
    handle: JoinHandle<()>,
}

impl RouterHandle {
    /// Wait for the router thread to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("router thread panicked");
        }
    }
}

struct RailState {
    rail: Rail,
    peers: HashMap<PeerId, Sender<Multipart>>,
}

impl RailState {
    fn new(rail: Rail) -> Self {
        Self {
            rail,
            peers: HashMap::new(),
        }
    }

    /// Apply one event. Returns a data message nobody subscribes to.
    fn handle(&mut self, event: RailEvent) -> Option<DataMessage> {
        match event {
            RailEvent::Join { peer, deliver } => {
                debug!("[{}] peer {} joined", self.rail.name(), peer);
                self.peers.insert(peer, deliver);
                None
            }
            RailEvent::Leave { peer } => {
                debug!("[{}] peer {} left", self.rail.name(), peer);
                self.peers.remove(&peer);
                self.rail.topics_mut().retain(|_, subs| {
                    subs.remove(&peer);
                    !subs.is_empty()
                });
                None
            }
            RailEvent::Message { peer, parts } => match BusMessage::parse(parts) {
                Ok(BusMessage::Subscribe(topic)) => {
                    self.rail.topics_mut().entry(topic).or_default().insert(peer);
                    self.rail.counters().control.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Ok(BusMessage::Unsubscribe(topic)) => {
                    let mut topics = self.rail.topics_mut();
                    if let Some(subs) = topics.get_mut(&topic) {
                        subs.remove(&peer);
                        if subs.is_empty() {
                            topics.remove(&topic);
                        }
                    }
                    self.rail.counters().control.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Ok(BusMessage::Data(msg)) => self.route(msg),
                Err(e) => {
                    warn!("[{}] peer {}: {}", self.rail.name(), peer, e);
                    self.rail
                        .counters()
                        .protocol_errors
                        .fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
        }
    }

    /// Deliver to the subscribers of `msg.to`, or hand the message back.
    fn route(&mut self, msg: DataMessage) -> Option<DataMessage> {
        let subscribers: Vec<PeerId> = match self.rail.topics_mut().get(&msg.to) {
            Some(subs) if !subs.is_empty() => subs.iter().copied().collect(),
            _ => return Some(msg),
        };

        self.rail.tap(msg.to_parts());
        let delivery = msg.to_delivery();
        for peer in subscribers {
            if let Some(deliver) = self.peers.get(&peer) {
                if deliver.send(delivery.clone()).is_err() {
                    debug!("[{}] peer {} inbox closed", self.rail.name(), peer);
                }
            }
        }
        self.rail.counters().forwarded.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn drop_unroutable(&self, msg: &DataMessage) {
        debug!(
            "[{}] no subscriber for '{}', dropping message from '{}'",
            self.rail.name(),
            display_name(&msg.to),
            display_name(&msg.from)
        );
        self.rail.counters().dropped.fetch_add(1, Ordering::Relaxed);
    }
}

struct RouterCore {
    command: RailState,
    response: RailState,
}

impl RouterCore {
    fn run(&mut self, token: &ShutdownToken) {
        info!(
            "Router started (rails '{}' and '{}')",
            self.command.rail.name(),
            self.response.rail.name()
        );
        let command_rx = self.command.rail.events().clone();
        let response_rx = self.response.rail.events().clone();

        loop {
            select! {
                recv(command_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_command(event);
                    }
                }
                recv(response_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_response(event);
                    }
                }
                recv(token.cancelled()) -> _ => break,
            }
        }
        info!(
            "Router stopped: command {:?}, response {:?}",
            self.command.rail.stats(),
            self.response.rail.stats()
        );
    }

    fn on_command(&mut self, event: RailEvent) {
        let Some(msg) = self.command.handle(event) else {
            return;
        };

        let text = format!("{NO_SUCH_DESTINATION}: {}", display_name(&msg.to));
        debug!(
            "[{}] {} (from '{}')",
            self.command.rail.name(),
            text,
            display_name(&msg.from)
        );
        self.command
            .rail
            .counters()
            .errors_synthesized
            .fetch_add(1, Ordering::Relaxed);

        let reply = DataMessage::new(msg.to, msg.from, vec![text.into_bytes()]);
        if let Some(unroutable) = self.response.route(reply) {
            self.response.drop_unroutable(&unroutable);
        }
    }

    fn on_response(&mut self, event: RailEvent) {
        if let Some(msg) = self.response.handle(event) {
            self.response.drop_unroutable(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn running_router() -> (Router, ShutdownToken, RouterHandle) {
        let router = Router::new(&BusSection::default());
        let token = ShutdownToken::new();
        let handle = router.spawn(token.clone()).unwrap();
        (router, token, handle)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_known_destination_is_reversed_for_subscriber() {
        let (router, token, handle) = running_router();
        let actor = router.command_rail().connect().unwrap();
        actor.subscribe("svc").unwrap();
        assert!(router.command_rail().wait_for_subscriber("svc", WAIT));

        let client = router.command_rail().connect().unwrap();
        client.send_data(b"client", b"svc", &[b"a", b"b"]).unwrap();

        let got = actor.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(got, vec![b"svc".to_vec(), b"client".to_vec(), b"a".to_vec(), b"b".to_vec()]);

        let tapped = router.command_rail().monitor().recv_timeout(WAIT).unwrap();
        assert_eq!(tapped[0], b"client");
        assert_eq!(router.command_rail().stats().forwarded, 1);

        token.cancel();
        handle.join();
    }

    #[test]
    fn test_unsubscribe_last_peer_removes_topic() {
        let (router, token, handle) = running_router();
        let a = router.command_rail().connect().unwrap();
        let b = router.command_rail().connect().unwrap();
        a.subscribe("t").unwrap();
        b.subscribe("t").unwrap();
        a.unsubscribe("t").unwrap();
        b.subscribe("other").unwrap();
        assert!(router.command_rail().wait_for_subscriber("other", WAIT));
        assert_eq!(router.command_rail().topics(), vec!["other", "t"]);

        drop(b);
        let deadline = Instant::now() + WAIT;
        while !router.command_rail().topics().is_empty() {
            assert!(Instant::now() < deadline, "topics not cleared");
            thread::sleep(Duration::from_millis(1));
        }

        token.cancel();
        handle.join();
    }

    #[test]
    fn test_malformed_message_counted_not_forwarded() {
        let (router, token, handle) = running_router();
        let actor = router.command_rail().connect().unwrap();
        actor.subscribe("svc").unwrap();
        assert!(router.command_rail().wait_for_subscriber("svc", WAIT));

        let client = router.command_rail().connect().unwrap();
        client.send(vec![b"client".to_vec(), b"svc".to_vec()]).unwrap();
        client.send(vec![b"\x05svc".to_vec()]).unwrap();
        assert!(actor.recv_timeout(Duration::from_millis(100)).unwrap().is_none());
        assert_eq!(router.command_rail().stats().protocol_errors, 2);

        token.cancel();
        handle.join();
    }

    #[test]
    fn test_unknown_response_destination_dropped() {
        let (router, token, handle) = running_router();
        let peer = router.response_rail().connect().unwrap();
        peer.send_data(b"svc", b"nobody", &[b"late"]).unwrap();

        let deadline = Instant::now() + WAIT;
        while router.response_rail().stats().dropped == 0 {
            assert!(Instant::now() < deadline, "message not dropped");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(router.response_rail().stats().errors_synthesized, 0);
        assert!(router.response_rail().monitor().try_recv().is_err());

        token.cancel();
        handle.join();
    }

    #[test]
    fn test_cancel_stops_idle_router() {
        let (_router, token, handle) = running_router();
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        token.cancel();
        handle.join();
        assert!(start.elapsed() < WAIT);
    }
}
