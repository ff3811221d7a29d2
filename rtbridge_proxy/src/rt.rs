//! In-process stand-in for the RT side of an actor's rings.
//!
//! Each cycle it reads at most one message from the to-RT ring and echoes it
//! into the from-RT ring. It never waits on the non-RT side: a reply that does
//! not fit is kept and retried next cycle, and no new message is read while
//! one is pending.

use crate::shutdown::ShutdownToken;
use rtbridge_shm::{ErrorKind, MultiframeReader, MultiframeWriter, OwnedFrame, ShmResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default RT cycle period.
pub const DEFAULT_CYCLE: Duration = Duration::from_micros(500);

/// Loopback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtStats {
    /// Cycles run
    pub cycles: u64,
    /// Messages taken from the to-RT ring
    pub received: u64,
    /// Messages written to the from-RT ring
    pub replied: u64,
    /// Cycles that found the from-RT ring full
    pub stalled: u64,
    /// Malformed messages skipped on the to-RT ring
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    received: AtomicU64,
    replied: AtomicU64,
    stalled: AtomicU64,
    malformed: AtomicU64,
}

/// Loopback RT endpoint. Without a from-RT writer it only consumes.
pub struct RtEndpoint {
    name: String,
    rx: MultiframeReader,
    tx: Option<MultiframeWriter>,
    pending: Option<Vec<OwnedFrame>>,
    period: Duration,
    counters: Arc<Counters>,
}

impl RtEndpoint {
    /// Endpoint reading `rx` and replying on `tx`.
    pub fn new(name: impl Into<String>, rx: MultiframeReader, tx: Option<MultiframeWriter>) -> Self {
        Self {
            name: name.into(),
            rx,
            tx,
            pending: None,
            period: DEFAULT_CYCLE,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Override the cycle period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// One non-blocking cycle.
    pub fn cycle(&mut self) -> ShmResult<()> {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        if self.pending.is_none() {
            match self.rx.read_message() {
                Ok(Some(frames)) => {
                    debug!("[rt:{}] received {} frame(s)", self.name, frames.len());
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    self.pending = Some(frames);
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }

        let Some(frames) = self.pending.take() else {
            return Ok(());
        };
        let Some(tx) = self.tx.as_mut() else {
            return Ok(());
        };
        match tx.write_message(&frames) {
            Ok(()) => {
                self.counters.replied.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.counters.stalled.fetch_add(1, Ordering::Relaxed);
                self.pending = Some(frames);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run cycles on a dedicated thread until `token` is cancelled.
    pub fn spawn(mut self, token: ShutdownToken) -> std::io::Result<RtHandle> {
        let counters = Arc::clone(&self.counters);
        let name = self.name.clone();
        let thread = thread::Builder::new()
            .name(format!("rt-{name}"))
            .spawn(move || {
                info!("[rt:{}] loopback started", self.name);
                loop {
                    if let Err(e) = self.cycle() {
                        warn!("[rt:{}] cycle failed: {}", self.name, e);
                    }
                    if token.sleep(self.period) {
                        break;
                    }
                }
                info!("[rt:{}] loopback stopped: {:?}", self.name, self.stats());
            })?;
        Ok(RtHandle {
            name,
            counters,
            thread,
        })
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RtStats {
        snapshot(&self.counters)
    }
}

fn snapshot(c: &Counters) -> RtStats {
    RtStats {
        cycles: c.cycles.load(Ordering::Relaxed),
        received: c.received.load(Ordering::Relaxed),
        replied: c.replied.load(Ordering::Relaxed),
        stalled: c.stalled.load(Ordering::Relaxed),
        malformed: c.malformed.load(Ordering::Relaxed),
    }
}

/// A running loopback endpoint.
pub struct RtHandle {
    name: String,
    counters: Arc<Counters>,
    thread: JoinHandle<()>,
}

impl RtHandle {
    /// Name of the actor served.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RtStats {
        snapshot(&self.counters)
    }

    /// Wait for the endpoint thread to exit.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("[rt:{}] loopback thread panicked", self.name);
        }
    }
}
