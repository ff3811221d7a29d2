//! Cancellation token shared by every worker.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    cancelled: Mutex<bool>,
    cvar: Condvar,
    // Dropped on cancel, which disconnects `closed`.
    trigger: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

/// Cloneable cancellation flag whose sleepers wake as soon as it is set.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        let (trigger, closed) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                cvar: Condvar::new(),
                trigger: Mutex::new(Some(trigger)),
                closed,
            }),
        }
    }

    /// Request shutdown and wake every sleeper.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.cvar.notify_all();
        self.inner.trigger.lock().take();
    }

    /// Whether shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Receiver that never yields a message and disconnects on cancel.
    ///
    /// Meant as a `select!` arm next to a worker's own channels.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.closed
    }

    /// Sleep up to `timeout`. Returns `true` if cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .cvar
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            self.inner.cvar.wait(&mut cancelled);
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_runs_full_timeout_when_not_cancelled() {
        let token = ShutdownToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_sleeper_immediately() {
        let token = ShutdownToken::new();
        let sleeper = token.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_disconnects_select_arm() {
        let token = ShutdownToken::new();
        assert!(matches!(
            token.cancelled().try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        ));

        let waiter = token.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            crossbeam_channel::select! {
                recv(waiter.cancelled()) -> msg => msg.is_err(),
                default(Duration::from_secs(30)) => false,
            }
        });

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_after_cancel_returns_at_once() {
        let token = ShutdownToken::new();
        token.cancel();
        assert!(token.sleep(Duration::from_secs(30)));
        token.wait();
    }
}
