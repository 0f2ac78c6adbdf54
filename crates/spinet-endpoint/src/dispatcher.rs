use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use spinet_frame::{decode_and_validate, FrameConfig};
use tracing::{debug, trace, warn};

use crate::adapter::Adapter;
use crate::receive::{ReceiveSlot, Take};
use crate::stats::LinkStats;

/// What one dispatcher cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A payload of this many bytes went up to the adapter.
    Delivered(usize),
    /// The slot held nothing new.
    Idle,
    /// A valid frame with an empty payload; nothing to deliver.
    EmptyFrame,
    /// The envelope failed validation (includes filler exchanges).
    Invalid,
    /// The slot stayed locked; try again on the next wake.
    LockTimeout,
    /// The adapter could not provide a buffer.
    AllocationFailed,
}

/// Validates received envelopes and forwards payloads upward.
///
/// Runs on its own thread; only one dispatcher serves a slot.
pub struct Dispatcher {
    slot: Arc<ReceiveSlot>,
    adapter: Arc<dyn Adapter>,
    stats: Arc<LinkStats>,
    config: FrameConfig,
    lock_timeout: Duration,
    scratch: Box<[u8]>,
}

impl Dispatcher {
    pub fn new(
        slot: Arc<ReceiveSlot>,
        adapter: Arc<dyn Adapter>,
        stats: Arc<LinkStats>,
        config: FrameConfig,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            slot,
            adapter,
            stats,
            lock_timeout,
            scratch: vec![0u8; config.envelope_len()].into_boxed_slice(),
            config,
        }
    }

    /// Handle whatever the slot currently holds.
    pub fn run_once(&mut self) -> Dispatch {
        let len = match self.slot.take(&mut self.scratch, self.lock_timeout) {
            Take::Ready(len) => len,
            Take::Empty => return Dispatch::Idle,
            Take::LockTimeout => {
                self.stats.record_lock_timeout();
                debug!(
                    timeout_ms = millis(self.lock_timeout),
                    "receive slot busy, skipping cycle"
                );
                return Dispatch::LockTimeout;
            }
        };

        let frame = match decode_and_validate(&self.scratch[..len], &self.config) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.record_invalid();
                debug!(error = %err, "dropping invalid frame");
                return Dispatch::Invalid;
            }
        };

        if frame.is_empty() {
            self.stats.record_empty();
            trace!("valid frame with empty payload");
            return Dispatch::EmptyFrame;
        }

        let Some(mut buf) = self.adapter.alloc_frame(frame.len()) else {
            self.stats.record_alloc_failure();
            warn!(len = frame.len(), "no buffer for received frame, dropping");
            return Dispatch::AllocationFailed;
        };
        buf.extend_from_slice(frame.payload());

        let delivered = buf.len();
        self.adapter.deliver_frame(Bytes::from(buf));
        self.stats.record_delivered();
        trace!(len = delivered, "delivered frame");
        Dispatch::Delivered(delivered)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("envelope_len", &self.config.envelope_len())
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::Receiver;

    use spinet_frame::encode_envelope;

    use super::*;
    use crate::adapter::ChannelAdapter;

    const ENVELOPE: usize = 32;

    fn setup() -> (Dispatcher, Arc<ReceiveSlot>, Arc<LinkStats>, Receiver<Bytes>) {
        let slot = Arc::new(ReceiveSlot::new(ENVELOPE));
        let stats = Arc::new(LinkStats::default());
        let (adapter, rx) = ChannelAdapter::new(8);
        let dispatcher = Dispatcher::new(
            Arc::clone(&slot),
            Arc::new(adapter),
            Arc::clone(&stats),
            FrameConfig::new(ENVELOPE).unwrap(),
            Duration::from_millis(10),
        );
        (dispatcher, slot, stats, rx)
    }

    fn envelope(payload: &[u8]) -> Vec<u8> {
        encode_envelope(payload, &FrameConfig::new(ENVELOPE).unwrap())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn delivers_valid_frame() {
        let (mut dispatcher, slot, stats, rx) = setup();
        slot.store(&envelope(b"ping"));

        assert_eq!(dispatcher.run_once(), Dispatch::Delivered(4));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"ping"));
        assert_eq!(stats.snapshot().frames_delivered, 1);
    }

    #[test]
    fn nothing_to_do() {
        let (mut dispatcher, _slot, _stats, rx) = setup();
        assert_eq!(dispatcher.run_once(), Dispatch::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn filler_is_dropped_silently() {
        let (mut dispatcher, slot, stats, rx) = setup();
        slot.store(&[0u8; ENVELOPE]);

        assert_eq!(dispatcher.run_once(), Dispatch::Invalid);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot().invalid_frames, 1);
    }

    #[test]
    fn corrupted_payload_is_dropped() {
        let (mut dispatcher, slot, stats, rx) = setup();
        let mut raw = envelope(b"ping");
        raw[6] ^= 0x01;
        slot.store(&raw);

        assert_eq!(dispatcher.run_once(), Dispatch::Invalid);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot().frames_delivered, 0);
    }

    #[test]
    fn empty_payload_is_not_delivered() {
        let (mut dispatcher, slot, stats, rx) = setup();
        slot.store(&envelope(b""));

        assert_eq!(dispatcher.run_once(), Dispatch::EmptyFrame);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot().empty_frames, 1);
    }

    #[test]
    fn only_latest_is_delivered() {
        let (mut dispatcher, slot, _stats, rx) = setup();
        slot.store(&envelope(b"first"));
        slot.store(&envelope(b"second"));

        assert_eq!(dispatcher.run_once(), Dispatch::Delivered(6));
        assert_eq!(dispatcher.run_once(), Dispatch::Idle);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"second"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn lock_timeout_skips_cycle() {
        let (mut dispatcher, slot, stats, rx) = setup();
        slot.store(&envelope(b"late"));

        let guard = slot.hold();
        assert_eq!(dispatcher.run_once(), Dispatch::LockTimeout);
        drop(guard);
        assert_eq!(stats.snapshot().lock_timeouts, 1);

        assert_eq!(dispatcher.run_once(), Dispatch::Delivered(4));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"late"));
    }

    #[test]
    fn huge_timeouts_saturate_in_logs() {
        assert_eq!(millis(Duration::from_millis(50)), 50);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    struct StarvedAdapter {
        delivered: AtomicBool,
    }

    impl Adapter for StarvedAdapter {
        fn deliver_frame(&self, _frame: Bytes) {
            self.delivered.store(true, Ordering::SeqCst);
        }

        fn alloc_frame(&self, _len: usize) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn allocation_failure_drops_frame() {
        let slot = Arc::new(ReceiveSlot::new(ENVELOPE));
        let stats = Arc::new(LinkStats::default());
        let adapter = Arc::new(StarvedAdapter {
            delivered: AtomicBool::new(false),
        });
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&slot),
            adapter.clone(),
            Arc::clone(&stats),
            FrameConfig::new(ENVELOPE).unwrap(),
            Duration::from_millis(10),
        );
        slot.store(&envelope(b"frame"));

        assert_eq!(dispatcher.run_once(), Dispatch::AllocationFailed);
        assert!(!adapter.delivered.load(Ordering::SeqCst));
        assert_eq!(stats.snapshot().alloc_failures, 1);
        assert_eq!(dispatcher.run_once(), Dispatch::Idle);
    }
}
