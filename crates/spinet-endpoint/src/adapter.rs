//! Seams between an endpoint and the network stack above it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use bytes::Bytes;

use crate::error::Result;
use crate::netif::LinkState;

/// Upward path: receives validated payloads from the dispatcher.
///
/// Called from the dispatcher thread, never from interrupt context.
pub trait Adapter: Send + Sync {
    /// Take ownership of one received payload.
    fn deliver_frame(&self, frame: Bytes);

    /// Allocate an empty buffer able to hold `len` bytes.
    ///
    /// `None` means the allocation failed; the frame is dropped.
    fn alloc_frame(&self, len: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        Some(buf)
    }

    /// Informational link state change.
    fn link_changed(&self, _state: LinkState) {}
}

/// Downward path: what a network interface transmits through.
pub trait Transport: Send + Sync {
    /// Send one payload. [`EndpointError::Busy`](crate::EndpointError::Busy)
    /// is transient.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Advisory check; a `send` may still report busy.
    fn can_send(&self) -> bool;
}

/// Adapter handing frames to a bounded channel.
///
/// Frames arriving while the channel is full are dropped and counted.
#[derive(Debug)]
pub struct ChannelAdapter {
    tx: SyncSender<Bytes>,
    dropped: AtomicU64,
}

impl ChannelAdapter {
    pub fn new(capacity: usize) -> (Self, Receiver<Bytes>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Frames dropped because the receiver was full or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Adapter for ChannelAdapter {
    fn deliver_frame(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(len = frame.len(), "delivery channel full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("delivery channel closed");
            }
        }
    }
}
