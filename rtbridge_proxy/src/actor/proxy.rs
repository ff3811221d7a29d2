//! The actor worker.
//!
//! A command arrives from the router as `[actor][from][payload...]`. Replies
//! leave on the response rail as `[actor][from][payload...]`, so the router
//! hands them to whoever subscribed to `from`.

use super::transcode::{is_native_container, rt_to_wire, wire_to_rt};
use super::{ActorCounters, ActorRoles, ActorState, ActorStats, Backoff};
use crate::bus::{Multipart, RailSocket, Router};
use crate::config::ActorConfig;
use crate::error::ActorError;
use crate::shutdown::ShutdownToken;
use rtbridge_common::bus::MIN_DATA_PARTS;
use rtbridge_shm::{MultiframeReader, MultiframeWriter, OwnedFrame, encoded_size};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reply sent when the to-RT ring stayed full for the whole wait.
pub const RING_BUSY: &str = "rt ring busy";
/// Reply sent when RT did not answer in time.
pub const RESPONSE_TIMEOUT: &str = "rt response timeout";
/// Reply sent when a message can never fit the to-RT ring.
pub const MESSAGE_TOO_LARGE: &str = "rt message too large";

const COMMAND_POLL: Duration = Duration::from_millis(50);
const DRAIN_BATCH: usize = 64;

/// The ring ends an actor owns.
#[derive(Default)]
pub struct ActorRings {
    /// Writing side of the to-RT ring
    pub to_rt: Option<MultiframeWriter>,
    /// Reading side of the from-RT ring
    pub from_rt: Option<MultiframeReader>,
}

enum Wait<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// One named actor, ready to run on its own thread.
pub struct ProxyActor {
    name: String,
    roles: ActorRoles,
    backoff: Backoff,
    rt_timeout: Duration,
    to_rt: Option<MultiframeWriter>,
    from_rt: Option<MultiframeReader>,
    command: RailSocket,
    response: RailSocket,
    counters: Arc<ActorCounters>,
    token: ShutdownToken,
}

impl ProxyActor {
    /// Connect to both rails and subscribe to the actor's name when it takes
    /// commands.
    ///
    /// # Errors
    ///
    /// `ActorError::MissingRing` if a role needs a ring not in `rings`.
    pub fn new(
        config: &ActorConfig,
        router: &Router,
        rings: ActorRings,
        token: ShutdownToken,
    ) -> Result<Self, ActorError> {
        let roles = config.role_flags();
        if roles.writes_to_rt() && rings.to_rt.is_none() {
            return Err(ActorError::MissingRing {
                actor: config.name.clone(),
                ring: "to-RT",
            });
        }
        if roles.reads_from_rt() && rings.from_rt.is_none() {
            return Err(ActorError::MissingRing {
                actor: config.name.clone(),
                ring: "from-RT",
            });
        }

        let command = router.command_rail().connect()?;
        if roles.consumes_commands() {
            command.subscribe(&config.name)?;
        }
        let response = router.response_rail().connect()?;

        Ok(Self {
            name: config.name.clone(),
            roles,
            backoff: Backoff::new(config.min_delay(), config.max_delay()),
            rt_timeout: config.rt_timeout(),
            to_rt: rings.to_rt,
            from_rt: rings.from_rt,
            command,
            response,
            counters: Arc::new(ActorCounters::default()),
            token,
        })
    }

    /// Actor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ActorStats {
        self.counters.snapshot()
    }

    /// Move the actor onto its own thread.
    pub fn spawn(self) -> Result<ActorHandle, ActorError> {
        let name = self.name.clone();
        let counters = Arc::clone(&self.counters);
        let thread = thread::Builder::new()
            .name(format!("actor-{name}"))
            .spawn(move || self.run())?;
        Ok(ActorHandle {
            name,
            counters,
            thread,
        })
    }

    /// Serve until the shutdown token is cancelled.
    pub fn run(mut self) -> Result<(), ActorError> {
        info!("Actor '{}' started with roles {:?}", self.name, self.roles);
        let result = self.serve();
        self.counters.set_state(ActorState::Stopped);
        match &result {
            Ok(()) => info!("Actor '{}' stopped: {:?}", self.name, self.stats()),
            Err(e) => error!("Actor '{}' failed: {}", self.name, e),
        }
        result
    }

    fn serve(&mut self) -> Result<(), ActorError> {
        let mut idle = self.backoff;
        let publisher = self.roles.contains(ActorRoles::PUBLISHER);

        while !self.token.is_cancelled() {
            let mut busy = false;
            if publisher {
                busy |= self.drain_from_rt()? > 0;
            }

            if self.roles.consumes_commands() {
                self.counters.set_state(ActorState::WaitForCommand);
                let timeout = match (publisher, busy) {
                    (false, _) => COMMAND_POLL,
                    (true, true) => Duration::ZERO,
                    (true, false) => idle.next_delay(),
                };
                match self.command.recv_until(self.token.cancelled(), timeout) {
                    Ok(Some(parts)) => {
                        busy = true;
                        self.handle_command(parts)?;
                    }
                    Ok(None) => {}
                    Err(_) if self.token.is_cancelled() => break,
                    Err(e) => return Err(e.into()),
                }
            } else if !busy && self.token.sleep(idle.next_delay()) {
                break;
            }

            if busy {
                idle.reset();
            }
            self.counters.set_state(ActorState::Idle);
        }
        Ok(())
    }

    fn handle_command(&mut self, parts: Multipart) -> Result<(), ActorError> {
        ActorCounters::bump(&self.counters.messages_in, 1);
        if parts.len() < MIN_DATA_PARTS {
            warn!("[{}] dropping command of {} part(s)", self.name, parts.len());
            return Ok(());
        }

        if self.roles.contains(ActorRoles::ECHO) {
            return self.publish(parts);
        }

        let from = parts[1].clone();
        let payload = &parts[2..];
        if self.roles.contains(ActorRoles::RESPONDER) {
            self.round_trip(&from, payload)
        } else {
            let origin = self
                .roles
                .contains(ActorRoles::INJECTOR)
                .then_some(from.as_slice());
            let frames = self.frames_for_rt(origin, payload);
            self.write_to_rt(&from, frames).map(|_| ())
        }
    }

    fn round_trip(&mut self, from: &[u8], payload: &[Vec<u8>]) -> Result<(), ActorError> {
        self.discard_stale()?;
        let frames = self.frames_for_rt(None, payload);
        if !self.write_to_rt(from, frames)? {
            return Ok(());
        }

        self.counters.set_state(ActorState::WaitForRtResponse);
        match self.poll(|a| a.read_rt())? {
            Wait::Ready(frames) => {
                ActorCounters::bump(&self.counters.frames_rx, frames.len() as u64);
                self.trace("from-RT", &frames);
                let parts = self.frames_to_wire(frames);
                self.reply(from, parts)
            }
            Wait::TimedOut => {
                warn!(
                    "[{}] no RT reply within {:?} for '{}'",
                    self.name,
                    self.rt_timeout,
                    String::from_utf8_lossy(from)
                );
                self.reply_error(from, RESPONSE_TIMEOUT)
            }
            Wait::Cancelled => Ok(()),
        }
    }

    /// Wait for space, then write `frames` as one message. Returns whether the
    /// message reached the ring; failures are answered to `from`.
    fn write_to_rt(&mut self, from: &[u8], frames: Vec<OwnedFrame>) -> Result<bool, ActorError> {
        let needed = encoded_size(frames.iter().map(|f| f.payload.len()));
        let capacity = self.writer()?.capacity();
        if needed > capacity {
            ActorCounters::bump(&self.counters.ring_tx_fail, 1);
            warn!(
                "[{}] message of {} bytes exceeds ring capacity {}",
                self.name, needed, capacity
            );
            self.reply_error(from, MESSAGE_TOO_LARGE)?;
            return Ok(false);
        }

        self.counters.set_state(ActorState::WaitForToRtSpace);
        match self.poll(|a| Ok((a.writer()?.free_space() >= needed).then_some(())))? {
            Wait::Ready(()) => {}
            Wait::TimedOut => {
                ActorCounters::bump(&self.counters.ring_tx_fail, 1);
                warn!("[{}] to-RT ring full for {:?}", self.name, self.rt_timeout);
                self.reply_error(from, RING_BUSY)?;
                return Ok(false);
            }
            Wait::Cancelled => return Ok(false),
        }

        self.counters.set_state(ActorState::WritingToRt);
        self.trace("to-RT", &frames);
        if let Err(e) = self.writer()?.write_message(&frames) {
            ActorCounters::bump(&self.counters.ring_tx_fail, 1);
            warn!("[{}] to-RT write failed: {}", self.name, e);
            self.reply_error(from, RING_BUSY)?;
            return Ok(false);
        }
        ActorCounters::bump(&self.counters.frames_tx, frames.len() as u64);
        Ok(true)
    }

    /// Publish every complete RT message, first frame naming the destination.
    fn drain_from_rt(&mut self) -> Result<usize, ActorError> {
        let mut drained = 0;
        while drained < DRAIN_BATCH {
            let Some(frames) = self.read_rt()? else {
                break;
            };
            drained += 1;
            ActorCounters::bump(&self.counters.frames_rx, frames.len() as u64);
            self.trace("from-RT", &frames);

            let mut parts = self.frames_to_wire(frames);
            if parts.len() < 2 {
                warn!("[{}] RT message without payload dropped", self.name);
                continue;
            }
            let dest = parts.remove(0);
            let mut message = Vec::with_capacity(parts.len() + 2);
            message.push(self.name.clone().into_bytes());
            message.push(dest);
            message.extend(parts);
            self.publish(message)?;
        }
        Ok(drained)
    }

    /// Drop replies left over from requests that already timed out.
    fn discard_stale(&mut self) -> Result<(), ActorError> {
        while let Some(frames) = self.read_rt()? {
            warn!(
                "[{}] discarding stale RT reply of {} frame(s)",
                self.name,
                frames.len()
            );
        }
        Ok(())
    }

    /// Next complete message from RT. A malformed one is counted and skipped
    /// by the reader, and the actor keeps serving.
    fn read_rt(&mut self) -> Result<Option<Vec<OwnedFrame>>, ActorError> {
        match self.reader()?.read_message() {
            Ok(frames) => Ok(frames),
            Err(e) => {
                ActorCounters::bump(&self.counters.frame_errors, 1);
                warn!("[{}] dropped malformed RT message: {}", self.name, e);
                Ok(None)
            }
        }
    }

    fn poll<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Self) -> Result<Option<T>, ActorError>,
    ) -> Result<Wait<T>, ActorError> {
        let deadline = Instant::now() + self.rt_timeout;
        self.backoff.reset();
        loop {
            if let Some(value) = attempt(self)? {
                return Ok(Wait::Ready(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Wait::TimedOut);
            }
            let delay = self.backoff.next_delay();
            self.counters
                .current_delay_us
                .store(delay.as_micros() as u64, Ordering::Relaxed);
            if self.token.sleep(delay.min(deadline - now)) {
                return Ok(Wait::Cancelled);
            }
        }
    }

    fn frames_for_rt(&self, origin: Option<&[u8]>, payload: &[Vec<u8>]) -> Vec<OwnedFrame> {
        let mut frames = Vec::with_capacity(payload.len() + 1);
        if let Some(origin) = origin {
            frames.push(OwnedFrame::transparent(origin));
        }
        for part in payload {
            if !self.roles.contains(ActorRoles::TRANSCODE) {
                frames.push(OwnedFrame::transparent(part.as_slice()));
                continue;
            }
            match wire_to_rt(part) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    ActorCounters::bump(&self.counters.decode_fail, 1);
                    debug!("[{}] sending part untranscoded: {}", self.name, e);
                    frames.push(OwnedFrame::transparent(part.as_slice()));
                }
            }
        }
        frames
    }

    fn frames_to_wire(&self, frames: Vec<OwnedFrame>) -> Multipart {
        let transcode = self.roles.contains(ActorRoles::TRANSCODE);
        frames
            .into_iter()
            .map(|frame| {
                if !(transcode && is_native_container(&frame)) {
                    return frame.payload;
                }
                match rt_to_wire(&frame) {
                    Ok(wire) => wire,
                    Err(e) => {
                        ActorCounters::bump(&self.counters.decode_fail, 1);
                        debug!("[{}] passing RT frame through: {}", self.name, e);
                        frame.payload
                    }
                }
            })
            .collect()
    }

    fn trace(&self, direction: &str, frames: &[OwnedFrame]) {
        if !self.roles.contains(ActorRoles::TRACE) {
            return;
        }
        for (i, frame) in frames.iter().enumerate() {
            debug!(
                "[{}] {} frame {}/{}: {:?} subtype={} {} bytes",
                self.name,
                direction,
                i + 1,
                frames.len(),
                frame.flags.frametype,
                frame.flags.subtype,
                frame.payload.len()
            );
        }
    }

    fn reply(&mut self, to: &[u8], payload: Multipart) -> Result<(), ActorError> {
        let mut parts = Vec::with_capacity(payload.len() + 2);
        parts.push(self.name.clone().into_bytes());
        parts.push(to.to_vec());
        parts.extend(payload);
        self.publish(parts)
    }

    fn reply_error(&mut self, to: &[u8], reason: &str) -> Result<(), ActorError> {
        let text = format!("{reason}: {}", self.name);
        self.reply(to, vec![text.into_bytes()])
    }

    fn publish(&mut self, parts: Multipart) -> Result<(), ActorError> {
        self.response.send(parts)?;
        ActorCounters::bump(&self.counters.messages_out, 1);
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut MultiframeWriter, ActorError> {
        let name = &self.name;
        self.to_rt.as_mut().ok_or_else(|| ActorError::MissingRing {
            actor: name.clone(),
            ring: "to-RT",
        })
    }

    fn reader(&mut self) -> Result<&mut MultiframeReader, ActorError> {
        let name = &self.name;
        self.from_rt.as_mut().ok_or_else(|| ActorError::MissingRing {
            actor: name.clone(),
            ring: "from-RT",
        })
    }
}

/// A running actor.
pub struct ActorHandle {
    name: String,
    counters: Arc<ActorCounters>,
    thread: JoinHandle<Result<(), ActorError>>,
}

impl ActorHandle {
    /// Actor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistics snapshot, readable while the actor runs.
    pub fn stats(&self) -> ActorStats {
        self.counters.snapshot()
    }

    /// Whether the worker thread exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker to exit and return its result.
    pub fn join(self) -> Result<(), ActorError> {
        self.thread.join().map_err(|_| ActorError::Panicked {
            actor: self.name.clone(),
        })?
    }
}
