use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

/// Outcome of storing a completed envelope from interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Stored into an empty slot.
    Stored,
    /// Stored over an envelope the dispatcher had not taken yet.
    Overwrote,
    /// The dispatcher held the slot; the envelope went to the spare buffer
    /// and wins over the one being taken.
    Parked,
    /// Both buffers were held; the envelope was dropped.
    Contended,
}

impl Store {
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Contended)
    }
}

/// Outcome of a dispatcher take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Take {
    /// `len` bytes were copied out.
    Ready(usize),
    /// Nothing new since the last take.
    Empty,
    /// The slot stayed locked past the timeout.
    LockTimeout,
}

struct Pending {
    fresh: bool,
    seq: u64,
    len: usize,
    buf: Box<[u8]>,
}

impl Pending {
    fn new(envelope_len: usize) -> Self {
        Self {
            fresh: false,
            seq: 0,
            len: 0,
            buf: vec![0u8; envelope_len].into_boxed_slice(),
        }
    }

    /// Returns whether an untaken envelope was replaced.
    fn fill(&mut self, rx: &[u8], seq: u64) -> bool {
        let len = rx.len().min(self.buf.len());
        self.buf[..len].copy_from_slice(&rx[..len]);
        self.len = len;
        self.seq = seq;
        std::mem::replace(&mut self.fresh, true)
    }

    fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let len = self.len.min(dst.len());
        dst[..len].copy_from_slice(&self.buf[..len]);
        self.fresh = false;
        len
    }
}

/// Single-slot handoff of the latest received envelope.
///
/// Newer envelopes replace older untaken ones; only the latest is kept. The
/// slot has a spare buffer for envelopes that complete while the dispatcher
/// is copying out of the primary one. The dispatcher never holds both, and
/// every store is stamped so a take returns whichever is newest.
pub struct ReceiveSlot {
    primary: Mutex<Pending>,
    spare: Mutex<Pending>,
    seq: AtomicU64,
}

impl ReceiveSlot {
    pub fn new(envelope_len: usize) -> Self {
        Self {
            primary: Mutex::new(Pending::new(envelope_len)),
            spare: Mutex::new(Pending::new(envelope_len)),
            seq: AtomicU64::new(0),
        }
    }

    /// Copy `rx` in. Interrupt safe: never waits for a lock.
    pub fn store(&self, rx: &[u8]) -> Store {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut primary) = self.primary.try_lock() {
            return if primary.fill(rx, seq) {
                Store::Overwrote
            } else {
                Store::Stored
            };
        }
        match self.spare.try_lock() {
            Some(mut spare) => {
                spare.fill(rx, seq);
                Store::Parked
            }
            None => Store::Contended,
        }
    }

    /// Copy the latest envelope into `dst`, waiting at most `timeout` for
    /// each lock.
    pub fn take(&self, dst: &mut [u8], timeout: Duration) -> Take {
        let taken = {
            let Some(mut primary) = self.primary.try_lock_for(timeout) else {
                return Take::LockTimeout;
            };
            if primary.fresh {
                Some((primary.seq, primary.copy_to(dst)))
            } else {
                None
            }
        };

        // Anything parked while the primary was held is at least as new.
        if let Some(mut spare) = self.spare.try_lock_for(timeout) {
            if spare.fresh {
                match taken {
                    Some((seq, _)) if seq > spare.seq => spare.fresh = false,
                    _ => return Take::Ready(spare.copy_to(dst)),
                }
            }
        }

        match taken {
            Some((_, len)) => Take::Ready(len),
            None => Take::Empty,
        }
    }

    #[cfg(test)]
    pub(crate) fn hold(&self) -> MutexGuard<'_, impl Sized> {
        self.primary.lock()
    }

    #[cfg(test)]
    pub(crate) fn hold_spare(&self) -> MutexGuard<'_, impl Sized> {
        self.spare.lock()
    }
}

impl std::fmt::Debug for ReceiveSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveSlot").finish_non_exhaustive()
    }
}
