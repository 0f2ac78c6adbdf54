//! Single-slot wake notification between interrupt and task context.
//!
//! Notifying never blocks and never allocates. Notifications raised while one
//! is already pending collapse into that one, so a woken task must always
//! re-read current state rather than assume one wake per event.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

/// Create a connected notifier/listener pair.
pub fn channel() -> (Notifier, NotifyListener) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Notifier { tx }, NotifyListener { rx })
}

/// Sending half. Safe to call from interrupt context.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: SyncSender<()>,
}

impl Notifier {
    /// Raise the token.
    ///
    /// Returns `false` if it was already pending (or the listener is gone).
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Notified,
    TimedOut,
    Closed,
}

/// Receiving half, owned by exactly one task.
#[derive(Debug)]
pub struct NotifyListener {
    rx: Receiver<()>,
}

impl NotifyListener {
    /// Block until notified. Returns `false` once every notifier is dropped.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Block until notified or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Wake {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Wake::Notified,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wake::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn bursts_collapse_to_one_wake() {
        let (notifier, listener) = channel();

        assert!(notifier.notify());
        assert!(!notifier.notify());
        assert!(!notifier.notify());

        assert_eq!(listener.wait_timeout(SHORT), Wake::Notified);
        assert_eq!(listener.wait_timeout(SHORT), Wake::TimedOut);
    }

    #[test]
    fn token_rearms_after_wake() {
        let (notifier, listener) = channel();

        notifier.notify();
        assert!(listener.wait());
        assert!(notifier.notify());
        assert!(listener.wait());
    }

    #[test]
    fn wakes_blocked_listener_from_other_thread() {
        let (notifier, listener) = channel();
        let waiter = thread::spawn(move || listener.wait_timeout(Duration::from_secs(2)));

        thread::sleep(SHORT);
        notifier.notify();

        assert_eq!(waiter.join().unwrap(), Wake::Notified);
    }

    #[test]
    fn dropping_notifiers_closes_listener() {
        let (notifier, listener) = channel();
        let clone = notifier.clone();
        drop(notifier);
        drop(clone);

        assert!(!listener.wait());
        assert_eq!(listener.wait_timeout(SHORT), Wake::Closed);
    }
}
