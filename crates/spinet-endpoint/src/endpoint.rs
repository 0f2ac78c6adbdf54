//! One side of a spinet link.
//!
//! An [`Endpoint`] owns the handshake, the transfer engine and the receive
//! slot, and runs two worker threads:
//!
//! - `<name>-xfer` queues the filler exchange when the peer asks to send, and
//!   walks the link back to idle after the settle time.
//! - `<name>-rx` validates received envelopes and hands payloads to the
//!   [`Adapter`].
//!
//! The link backend calls into the endpoint through [`LinkEvents`] from its
//! interrupt context. Those paths only touch atomics, a non-blocking slot
//! store and wake tokens; they never log.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spinet_frame::FrameConfig;
use spinet_link::{LinkEvents, LinkPort, Status};
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, Transport};
use crate::config::EndpointConfig;
use crate::dispatcher::Dispatcher;
use crate::engine::TransferEngine;
use crate::error::{EndpointError, Result};
use crate::handshake::{EdgeAction, Handshake, HandshakeState};
use crate::netif::LinkState;
use crate::notify::{self, Notifier, NotifyListener};
use crate::receive::{ReceiveSlot, Store};
use crate::stats::{LinkStats, StatsSnapshot};

struct Shared {
    name: String,
    port: Arc<dyn LinkPort>,
    engine: TransferEngine,
    handshake: Handshake,
    slot: Arc<ReceiveSlot>,
    stats: Arc<LinkStats>,
    rx_wake: Notifier,
    xfer_wake: Notifier,
    // Engine generation + 1 at the time the peer asked for a filler; 0 when
    // no request is outstanding.
    exchange_requested: AtomicU64,
    shutdown: AtomicBool,
    settle: Duration,
}

impl Shared {
    fn send(&self, payload: &[u8]) -> Result<()> {
        let max = self.engine.config().max_payload();
        if payload.len() > max {
            return Err(EndpointError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        if !self.handshake.begin_send() {
            self.stats.record_busy();
            return Err(EndpointError::Busy);
        }

        // Claim the wire before looking at the peer so two simultaneous
        // senders cannot both see the other as ready.
        self.port.set_status(Status::Busy);
        if self.port.peer_status().is_busy() {
            self.port.set_status(Status::Ready);
            if self.handshake.abort_send() {
                self.handle_edge();
            }
            self.stats.record_busy();
            debug!(endpoint = %self.name, "peer busy, send deferred");
            return Err(EndpointError::Busy);
        }

        // Read while still `RequestingSend`: no recovery can reset the engine
        // in this state, so any later reset also moved the link back to idle.
        let generation = self.engine.generation();
        if !self.handshake.commit_send() {
            self.port.set_status(Status::Ready);
            self.stats.record_busy();
            return Err(EndpointError::Busy);
        }

        match self.engine.start_exchange_since(Some(payload), generation) {
            Ok(true) => {}
            Ok(false) => {
                // Recovered underneath this send; the recovery already left
                // the link idle and ready.
                self.stats.record_busy();
                debug!(endpoint = %self.name, "send withdrawn by link recovery");
                return Err(EndpointError::Busy);
            }
            Err(err) => {
                self.release_transfer();
                warn!(endpoint = %self.name, error = %err, "failed to queue exchange");
                return Err(err);
            }
        }

        self.port.pulse_request();
        self.stats.record_sent();
        Ok(())
    }

    /// Undo a `Transmitting` claim whose exchange never got queued.
    fn release_transfer(&self) {
        self.port.set_status(Status::Ready);
        if self.handshake.abort_transfer() {
            self.handle_edge();
        }
    }

    fn can_send(&self) -> bool {
        self.handshake.state() == HandshakeState::Idle
            && !self.engine.in_flight()
            && !self.port.peer_status().is_busy()
    }

    /// React to a request edge. Runs in interrupt context, or in task context
    /// when replaying a parked edge.
    fn handle_edge(&self) {
        match self.handshake.on_edge(self.port.peer_status()) {
            EdgeAction::Recover { stale } => {
                self.exchange_requested.store(0, Ordering::SeqCst);
                // A plain sync pulse on an idle link has nothing to cancel.
                if stale || self.engine.in_flight() {
                    self.engine.reset();
                }
                self.port.set_status(Status::Ready);
                if stale {
                    self.stats.record_recovery();
                }
            }
            EdgeAction::StartExchange => {
                self.port.set_status(Status::Busy);
                self.exchange_requested
                    .store(self.engine.generation() + 1, Ordering::SeqCst);
                self.xfer_wake.notify();
            }
            EdgeAction::Deferred | EdgeAction::Ignore => {}
        }
    }

    /// One pass of the transfer worker.
    fn service_transfer(&self) {
        let requested = self.exchange_requested.swap(0, Ordering::SeqCst);
        if requested != 0
            && self.handshake.state() == HandshakeState::Transmitting
            && !self.engine.in_flight()
        {
            // Only queue for the request if no recovery voided it since.
            match self.engine.start_exchange_since(None, requested - 1) {
                Ok(true) => {}
                Ok(false) => debug!(endpoint = %self.name, "filler withdrawn by link recovery"),
                Err(err) => {
                    warn!(endpoint = %self.name, error = %err, "failed to queue filler exchange");
                    self.release_transfer();
                }
            }
        }

        if self.handshake.state() == HandshakeState::CoolingDown {
            if !self.settle.is_zero() {
                thread::sleep(self.settle);
            }
            if self.handshake.finish_cooldown() == Some(true) {
                self.handle_edge();
            }
        }
    }

    fn reset_link(&self) {
        self.handshake.force_idle();
        self.exchange_requested.store(0, Ordering::SeqCst);
        let cancelled = self.engine.reset();
        self.port.set_status(Status::Ready);
        self.port.pulse_request();
        self.stats.record_recovery();
        info!(endpoint = %self.name, cancelled, "link reset");
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.xfer_wake.notify();
        self.rx_wake.notify();
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl LinkEvents for Shared {
    fn on_request_edge(&self) {
        self.handle_edge();
    }

    fn on_exchange_complete(&self, rx: &[u8]) {
        match self.slot.store(rx) {
            Store::Stored => {
                self.rx_wake.notify();
            }
            Store::Overwrote => {
                self.stats.record_overwritten();
                self.rx_wake.notify();
            }
            Store::Parked => {
                self.stats.record_isr_contended();
                self.rx_wake.notify();
            }
            Store::Contended => self.stats.record_isr_contended(),
        }

        self.engine.complete();
        self.stats.record_exchange();

        // Leave Transmitting before going ready, so a request edge the peer
        // raises as soon as it sees us ready is parked rather than ignored.
        let settled = self.handshake.complete();
        self.port.set_status(Status::Ready);
        if settled {
            self.xfer_wake.notify();
        }
    }
}

/// A running endpoint. Dropping it stops the workers.
pub struct Endpoint {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Endpoint {
    /// Attach to `port` and start the worker threads.
    ///
    /// Ends with a sync pulse so a peer that was mid-transfer when this side
    /// (re)started abandons it.
    pub fn start<P>(config: &EndpointConfig, port: Arc<P>, adapter: Arc<dyn Adapter>) -> Result<Self>
    where
        P: LinkPort + 'static,
    {
        config.validate()?;
        let frame_config = config.frame_config()?;
        let port: Arc<dyn LinkPort> = port;

        let engine = TransferEngine::new(Arc::clone(&port), frame_config)?;
        let slot = Arc::new(ReceiveSlot::new(frame_config.envelope_len()));
        let stats = Arc::new(LinkStats::default());
        let (rx_wake, rx_listener) = notify::channel();
        let (xfer_wake, xfer_listener) = notify::channel();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            port,
            engine,
            handshake: Handshake::new(),
            slot: Arc::clone(&slot),
            stats: Arc::clone(&stats),
            rx_wake,
            xfer_wake,
            exchange_requested: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            settle: config.settle(),
        });

        let dispatcher = Dispatcher::new(
            slot,
            Arc::clone(&adapter),
            stats,
            frame_config,
            config.lock_timeout(),
        );

        let mut endpoint = Self {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(2),
        };
        endpoint.spawn("rx", {
            let shared = Arc::clone(&shared);
            move || run_dispatcher(&shared, dispatcher, rx_listener)
        })?;
        endpoint.spawn("xfer", {
            let shared = Arc::clone(&shared);
            move || run_transfer(&shared, xfer_listener)
        })?;

        let events: Weak<Shared> = Arc::downgrade(&shared);
        let events: Weak<dyn LinkEvents> = events;
        shared.port.attach(events)?;

        shared.port.set_status(Status::Ready);
        shared.port.pulse_request();
        if !shared.settle.is_zero() {
            thread::sleep(shared.settle);
        }
        adapter.link_changed(LinkState::Up);

        info!(
            endpoint = %config.name,
            envelope_len = frame_config.envelope_len(),
            max_payload = frame_config.max_payload(),
            "endpoint started"
        );
        Ok(endpoint)
    }

    fn spawn<F>(&mut self, role: &str, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{role}", self.shared.name);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(work)
            .map_err(|source| EndpointError::Spawn { name, source })?;
        self.workers.push(handle);
        Ok(())
    }

    /// Send one payload to the peer.
    ///
    /// Returns [`EndpointError::Busy`] if a transfer is in progress or the
    /// peer is busy; nothing was sent and the caller may retry.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.shared.send(payload)
    }

    /// Advisory: whether a `send` right now would likely be accepted.
    pub fn can_send(&self) -> bool {
        self.shared.can_send()
    }

    pub fn state(&self) -> HandshakeState {
        self.shared.handshake.state()
    }

    pub fn frame_config(&self) -> &FrameConfig {
        self.shared.engine.config()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Force the link back to idle and re-sync the peer.
    ///
    /// For a watchdog that sees the link stuck outside idle for too long.
    pub fn reset_link(&self) {
        self.shared.reset_link();
    }
}

impl Transport for Endpoint {
    fn send(&self, payload: &[u8]) -> Result<()> {
        Endpoint::send(self, payload)
    }

    fn can_send(&self) -> bool {
        Endpoint::can_send(self)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shared.stop();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!(endpoint = %self.shared.name, "worker panicked");
            }
        }
        debug!(endpoint = %self.shared.name, "endpoint stopped");
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn run_dispatcher(shared: &Shared, mut dispatcher: Dispatcher, wake: NotifyListener) {
    while wake.wait() {
        if shared.stopping() {
            break;
        }
        dispatcher.run_once();
    }
}

fn run_transfer(shared: &Shared, wake: NotifyListener) {
    while wake.wait() {
        if shared.stopping() {
            break;
        }
        shared.service_transfer();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;
    use std::time::Instant;

    use bytes::Bytes;
    use spinet_link::sim::{self, SimPort};
    use spinet_link::Signals;

    use super::*;
    use crate::adapter::ChannelAdapter;

    const WAIT: Duration = Duration::from_secs(2);

    fn config(name: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            envelope_len: 64,
            settle_us: 100,
            ..EndpointConfig::default()
        }
    }

    fn start(name: &str, port: SimPort) -> (Endpoint, Arc<SimPort>, Receiver<Bytes>) {
        let port = Arc::new(port);
        let (adapter, rx) = ChannelAdapter::new(16);
        let endpoint = Endpoint::start(&config(name), Arc::clone(&port), Arc::new(adapter)).unwrap();
        (endpoint, port, rx)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn rejects_envelope_mismatch() {
        let (a, _b) = sim::pair(32).unwrap();
        let (adapter, _rx) = ChannelAdapter::new(1);
        let err = Endpoint::start(&config("a"), Arc::new(a), Arc::new(adapter)).unwrap_err();
        assert!(matches!(err, EndpointError::Config(_)));
    }

    #[test]
    fn oversized_send_rejected_without_io() {
        let (a, b) = sim::pair(64).unwrap();
        let (left, port, _rx) = start("left", a);
        let (_right, _peer, _peer_rx) = start("right", b);

        let err = left.send(&[0u8; 60]).unwrap_err();
        assert!(matches!(err, EndpointError::PayloadTooLarge { size: 60, max: 59 }));
        assert_eq!(port.status(), Status::Ready);
        assert_eq!(left.state(), HandshakeState::Idle);
        assert_eq!(left.stats().frames_sent, 0);
    }

    #[test]
    fn send_reaches_peer_and_link_settles() {
        let (a, b) = sim::pair(64).unwrap();
        let (left, port, _left_rx) = start("left", a);
        let (right, _peer, right_rx) = start("right", b);
        assert!(port.wait_quiet(WAIT));

        left.send(b"hello").unwrap();
        assert_eq!(right_rx.recv_timeout(WAIT).unwrap(), Bytes::from_static(b"hello"));

        assert!(wait_until(|| left.can_send() && right.can_send()));
        assert_eq!(left.stats().frames_sent, 1);
        assert_eq!(right.stats().frames_delivered, 1);
        // The peer's filler arrives as an invalid frame and is dropped.
        assert!(wait_until(|| left.stats().invalid_frames == 1));
    }

    #[test]
    fn busy_peer_rejects_send() {
        let (a, b) = sim::pair(64).unwrap();
        let (left, port, _rx) = start("left", a);
        b.set_status(Status::Busy);

        assert!(matches!(left.send(b"x"), Err(EndpointError::Busy)));
        assert_eq!(port.status(), Status::Ready);
        assert_eq!(left.state(), HandshakeState::Idle);
        assert!(!port.is_queued());
        assert_eq!(left.stats().busy_rejections, 1);
        assert!(!left.can_send());
    }

    #[test]
    fn second_send_while_transmitting_is_busy() {
        let (a, _b) = sim::pair(64).unwrap();
        // No peer endpoint: the first exchange stays queued.
        let (left, port, _rx) = start("left", a);

        left.send(b"first").unwrap();
        assert!(port.is_queued());
        assert_eq!(left.state(), HandshakeState::Transmitting);

        assert!(matches!(left.send(b"second"), Err(EndpointError::Busy)));
        assert!(!left.can_send());
    }

    #[test]
    fn reset_link_recovers_stuck_transfer() {
        let (a, _b) = sim::pair(64).unwrap();
        let (left, port, _rx) = start("left", a);
        left.send(b"stuck").unwrap();

        left.reset_link();
        assert_eq!(left.state(), HandshakeState::Idle);
        assert!(!port.is_queued());
        assert_eq!(port.status(), Status::Ready);
        assert_eq!(left.stats().recoveries, 1);
    }

    /// A port whose peer re-syncs at the exact moment an exchange is being
    /// handed to the peripheral.
    #[derive(Default)]
    struct ResyncPort {
        events: parking_lot::Mutex<Option<Weak<dyn LinkEvents>>>,
        peer_busy: AtomicBool,
        queued: AtomicBool,
        resync_on_queue: AtomicBool,
        cancels: std::sync::atomic::AtomicUsize,
    }

    impl ResyncPort {
        fn raise_edge(&self) {
            let events = self.events.lock().as_ref().and_then(Weak::upgrade);
            if let Some(events) = events {
                events.on_request_edge();
            }
        }
    }

    impl Signals for ResyncPort {
        fn set_status(&self, _status: Status) {}

        fn peer_status(&self) -> Status {
            Status::from_level(self.peer_busy.load(Ordering::SeqCst))
        }

        fn pulse_request(&self) {}
    }

    impl spinet_link::Peripheral for ResyncPort {
        fn envelope_len(&self) -> usize {
            64
        }

        fn queue_exchange(&self, _tx: &[u8]) -> spinet_link::Result<()> {
            if self.resync_on_queue.swap(false, Ordering::SeqCst) {
                self.peer_busy.store(false, Ordering::SeqCst);
                self.raise_edge();
            }
            if self.queued.swap(true, Ordering::SeqCst) {
                return Err(spinet_link::LinkError::AlreadyQueued);
            }
            Ok(())
        }

        fn cancel_exchange(&self) -> bool {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.queued.swap(false, Ordering::SeqCst)
        }
    }

    impl LinkPort for ResyncPort {
        fn attach(&self, events: Weak<dyn LinkEvents>) -> spinet_link::Result<()> {
            *self.events.lock() = Some(events);
            Ok(())
        }
    }

    fn start_resync(port: &Arc<ResyncPort>) -> Endpoint {
        let (adapter, _rx) = ChannelAdapter::new(1);
        Endpoint::start(&config("resync"), Arc::clone(port), Arc::new(adapter)).unwrap()
    }

    #[test]
    fn resync_while_queuing_filler_leaves_link_usable() {
        let port = Arc::new(ResyncPort::default());
        let endpoint = start_resync(&port);

        // The peer asks to send; while our filler is being queued it restarts.
        port.resync_on_queue.store(true, Ordering::SeqCst);
        port.peer_busy.store(true, Ordering::SeqCst);
        port.raise_edge();

        assert!(wait_until(|| !port.resync_on_queue.load(Ordering::SeqCst)));
        assert!(wait_until(|| endpoint.state() == HandshakeState::Idle
            && !port.queued.load(Ordering::SeqCst)));
        assert_eq!(endpoint.stats().recoveries, 1);

        endpoint.send(b"after resync").unwrap();
        assert!(port.queued.load(Ordering::SeqCst));
        assert_eq!(endpoint.state(), HandshakeState::Transmitting);
    }

    #[test]
    fn resync_while_queuing_send_withdraws_it() {
        let port = Arc::new(ResyncPort::default());
        let endpoint = start_resync(&port);

        port.resync_on_queue.store(true, Ordering::SeqCst);
        assert!(matches!(endpoint.send(b"lost"), Err(EndpointError::Busy)));
        assert_eq!(endpoint.state(), HandshakeState::Idle);
        assert!(!port.queued.load(Ordering::SeqCst));

        endpoint.send(b"retry").unwrap();
        assert!(port.queued.load(Ordering::SeqCst));
    }

    #[test]
    fn sync_pulse_on_idle_link_cancels_nothing() {
        let port = Arc::new(ResyncPort::default());
        let endpoint = start_resync(&port);
        let cancels = port.cancels.load(Ordering::SeqCst);

        port.raise_edge();
        assert_eq!(port.cancels.load(Ordering::SeqCst), cancels);
        assert_eq!(endpoint.state(), HandshakeState::Idle);
        assert_eq!(endpoint.stats().recoveries, 0);
    }

    #[test]
    fn drop_joins_workers() {
        let (a, _b) = sim::pair(64).unwrap();
        let (left, _port, _rx) = start("left", a);
        drop(left);
    }
}
