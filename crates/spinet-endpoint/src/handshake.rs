//! Link-level handshake state.
//!
//! One endpoint owns one [`Handshake`]. The send path and the transfer worker
//! move it from task context; the request-edge handler moves it from interrupt
//! context. Every transition is a compare-and-swap so the two sides never act
//! on a state the other has already left.
//!
//! An edge that arrives while a send is being negotiated or the link is
//! settling cannot be served yet. It is parked in `edge_pending` and handed to
//! whichever side next returns the state to `Idle`. Both the flag and the
//! state use sequentially consistent ordering so exactly one side observes it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use spinet_link::Status;

const EDGE_RETRIES: usize = 8;

/// Where this endpoint is in the exchange cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandshakeState {
    /// Nothing in progress; both a local send and a peer request may start.
    Idle = 0,
    /// A local send has claimed the link and is checking the peer.
    RequestingSend = 1,
    /// An exchange is queued or on the wire.
    Transmitting = 2,
    /// An exchange finished; waiting for the peer to settle.
    CoolingDown = 3,
}

impl HandshakeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::RequestingSend,
            2 => Self::Transmitting,
            3 => Self::CoolingDown,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RequestingSend => "requesting-send",
            Self::Transmitting => "transmitting",
            Self::CoolingDown => "cooling-down",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the edge handler must do after [`Handshake::on_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    /// The peer is ready: drive our status ready and drop any queued exchange.
    ///
    /// `stale` is set when the state was not already idle, i.e. the peer was
    /// reset or restarted underneath a transfer.
    Recover { stale: bool },
    /// The peer wants to send. The state is now `Transmitting`; drive busy and
    /// have the transfer worker queue a filler exchange.
    StartExchange,
    /// The edge is parked and will be replayed on the next return to idle.
    Deferred,
    /// Nothing to do.
    Ignore,
}

/// Lock-free handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    state: AtomicU8,
    edge_pending: AtomicBool,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(HandshakeState::Idle as u8),
            edge_pending: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> HandshakeState {
        HandshakeState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Whether an edge is parked waiting for the next return to idle.
    pub fn edge_pending(&self) -> bool {
        self.edge_pending.load(Ordering::SeqCst)
    }

    fn transition(&self, from: HandshakeState, to: HandshakeState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move `from` to `Idle`. On success returns whether a parked edge must be
    /// replayed by the caller.
    fn release(&self, from: HandshakeState) -> Option<bool> {
        if self.transition(from, HandshakeState::Idle) {
            Some(self.edge_pending.swap(false, Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Claim the link for a local send: `Idle -> RequestingSend`.
    pub fn begin_send(&self) -> bool {
        self.transition(HandshakeState::Idle, HandshakeState::RequestingSend)
    }

    /// The peer was ready: `RequestingSend -> Transmitting`.
    ///
    /// A parked edge is dropped here. The exchange about to be queued is full
    /// duplex and serves the peer's request too.
    pub fn commit_send(&self) -> bool {
        if self.transition(HandshakeState::RequestingSend, HandshakeState::Transmitting) {
            self.edge_pending.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// The peer was busy: `RequestingSend -> Idle`.
    ///
    /// Returns `true` if the caller must replay a parked edge.
    pub fn abort_send(&self) -> bool {
        self.release(HandshakeState::RequestingSend).unwrap_or(false)
    }

    /// Queuing the exchange failed: `Transmitting -> Idle`.
    ///
    /// Returns `true` if the caller must replay a parked edge.
    pub fn abort_transfer(&self) -> bool {
        self.release(HandshakeState::Transmitting).unwrap_or(false)
    }

    /// Exchange finished: `Transmitting -> CoolingDown`. Interrupt safe.
    pub fn complete(&self) -> bool {
        self.transition(HandshakeState::Transmitting, HandshakeState::CoolingDown)
    }

    /// Settle time elapsed: `CoolingDown -> Idle`.
    ///
    /// `None` if the state was no longer cooling down (a recovery got there
    /// first); otherwise whether a parked edge must be replayed.
    pub fn finish_cooldown(&self) -> Option<bool> {
        self.release(HandshakeState::CoolingDown)
    }

    /// Unconditionally return to idle, discarding any parked edge.
    pub fn force_idle(&self) {
        self.state
            .store(HandshakeState::Idle as u8, Ordering::SeqCst);
        self.edge_pending.store(false, Ordering::SeqCst);
    }

    /// Decide what a request edge means given the sampled peer status.
    /// Interrupt safe.
    pub fn on_edge(&self, peer: Status) -> EdgeAction {
        for _ in 0..EDGE_RETRIES {
            let state = self.state();
            match (peer, state) {
                (Status::Ready, HandshakeState::Idle) => {
                    return EdgeAction::Recover { stale: false };
                }
                // Our own send is checking the peer; it will see the level itself.
                (Status::Ready, HandshakeState::RequestingSend) => return EdgeAction::Ignore,
                (Status::Ready, HandshakeState::Transmitting | HandshakeState::CoolingDown) => {
                    if self.transition(state, HandshakeState::Idle) {
                        self.edge_pending.store(false, Ordering::SeqCst);
                        return EdgeAction::Recover { stale: true };
                    }
                }
                (Status::Busy, HandshakeState::Idle) => {
                    if self.transition(HandshakeState::Idle, HandshakeState::Transmitting) {
                        return EdgeAction::StartExchange;
                    }
                }
                // Our queued exchange already serves the peer.
                (Status::Busy, HandshakeState::Transmitting) => return EdgeAction::Ignore,
                (Status::Busy, HandshakeState::RequestingSend | HandshakeState::CoolingDown) => {
                    self.edge_pending.store(true, Ordering::SeqCst);
                    if self.state() != HandshakeState::Idle {
                        return EdgeAction::Deferred;
                    }
                    // The owner went idle between our load and the store. If it
                    // already cleared the flag, it owns the replay.
                    if !self.edge_pending.swap(false, Ordering::SeqCst) {
                        return EdgeAction::Deferred;
                    }
                }
            }
        }

        self.edge_pending.store(true, Ordering::SeqCst);
        EdgeAction::Deferred
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    #[test]
    fn starts_idle() {
        let handshake = Handshake::new();
        assert_eq!(handshake.state(), HandshakeState::Idle);
        assert!(!handshake.edge_pending());
    }

    #[test]
    fn send_cycle() {
        let handshake = Handshake::new();

        assert!(handshake.begin_send());
        assert_eq!(handshake.state(), HandshakeState::RequestingSend);
        assert!(!handshake.begin_send());

        assert!(handshake.commit_send());
        assert_eq!(handshake.state(), HandshakeState::Transmitting);

        assert!(handshake.complete());
        assert_eq!(handshake.state(), HandshakeState::CoolingDown);

        assert_eq!(handshake.finish_cooldown(), Some(false));
        assert_eq!(handshake.state(), HandshakeState::Idle);
    }

    #[test]
    fn abort_send_returns_to_idle() {
        let handshake = Handshake::new();
        handshake.begin_send();

        assert!(!handshake.abort_send());
        assert_eq!(handshake.state(), HandshakeState::Idle);
        assert!(!handshake.commit_send());
    }

    #[test]
    fn complete_only_from_transmitting() {
        let handshake = Handshake::new();
        assert!(!handshake.complete());

        handshake.begin_send();
        assert!(!handshake.complete());
    }

    #[test]
    fn ready_edge_while_idle_is_a_harmless_recover() {
        let handshake = Handshake::new();
        assert_eq!(
            handshake.on_edge(Status::Ready),
            EdgeAction::Recover { stale: false }
        );
        assert_eq!(handshake.state(), HandshakeState::Idle);
    }

    #[test]
    fn ready_edge_mid_transfer_recovers() {
        for settle in [false, true] {
            let handshake = Handshake::new();
            handshake.begin_send();
            handshake.commit_send();
            if settle {
                handshake.complete();
            }

            assert_eq!(
                handshake.on_edge(Status::Ready),
                EdgeAction::Recover { stale: true }
            );
            assert_eq!(handshake.state(), HandshakeState::Idle);
        }
    }

    #[test]
    fn ready_edge_while_requesting_is_ignored() {
        let handshake = Handshake::new();
        handshake.begin_send();

        assert_eq!(handshake.on_edge(Status::Ready), EdgeAction::Ignore);
        assert_eq!(handshake.state(), HandshakeState::RequestingSend);
    }

    #[test]
    fn busy_edge_while_idle_starts_exchange() {
        let handshake = Handshake::new();

        assert_eq!(handshake.on_edge(Status::Busy), EdgeAction::StartExchange);
        assert_eq!(handshake.state(), HandshakeState::Transmitting);
        assert!(!handshake.begin_send());
    }

    #[test]
    fn busy_edge_while_transmitting_is_ignored() {
        let handshake = Handshake::new();
        handshake.on_edge(Status::Busy);

        assert_eq!(handshake.on_edge(Status::Busy), EdgeAction::Ignore);
        assert!(!handshake.edge_pending());
    }

    #[test]
    fn busy_edge_while_requesting_is_replayed_by_abort() {
        let handshake = Handshake::new();
        handshake.begin_send();

        assert_eq!(handshake.on_edge(Status::Busy), EdgeAction::Deferred);
        assert!(handshake.edge_pending());

        assert!(handshake.abort_send());
        assert!(!handshake.edge_pending());
        assert_eq!(handshake.on_edge(Status::Busy), EdgeAction::StartExchange);
    }

    #[test]
    fn busy_edge_while_cooling_is_replayed_by_finish() {
        let handshake = Handshake::new();
        handshake.on_edge(Status::Busy);
        handshake.complete();

        assert_eq!(handshake.on_edge(Status::Busy), EdgeAction::Deferred);
        assert_eq!(handshake.finish_cooldown(), Some(true));
        assert_eq!(handshake.finish_cooldown(), None);
    }

    #[test]
    fn commit_drops_parked_edge() {
        let handshake = Handshake::new();
        handshake.begin_send();
        handshake.on_edge(Status::Busy);

        assert!(handshake.commit_send());
        assert!(!handshake.edge_pending());
        handshake.complete();
        assert_eq!(handshake.finish_cooldown(), Some(false));
    }

    #[test]
    fn force_idle_clears_everything() {
        let handshake = Handshake::new();
        handshake.on_edge(Status::Busy);
        handshake.complete();
        handshake.on_edge(Status::Busy);

        handshake.force_idle();
        assert_eq!(handshake.state(), HandshakeState::Idle);
        assert!(!handshake.edge_pending());
    }

    #[test]
    fn abort_transfer_replays_parked_edge() {
        let handshake = Handshake::new();
        handshake.begin_send();
        handshake.commit_send();
        assert!(!handshake.abort_transfer());
        assert_eq!(handshake.state(), HandshakeState::Idle);
    }

    #[test]
    fn racing_edge_and_cooldown_hand_over_exactly_once() {
        for _ in 0..2000 {
            let handshake = Arc::new(Handshake::new());
            handshake.on_edge(Status::Busy);
            handshake.complete();

            let barrier = Arc::new(Barrier::new(2));
            let isr = {
                let handshake = Arc::clone(&handshake);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    handshake.on_edge(Status::Busy)
                })
            };

            barrier.wait();
            let replay = handshake.finish_cooldown();
            let action = isr.join().unwrap();

            let started_by_isr = action == EdgeAction::StartExchange;
            let replayed_by_task = match replay {
                Some(true) => true,
                Some(false) => false,
                None => panic!("cooldown should always be released by the task"),
            };
            assert!(
                started_by_isr ^ replayed_by_task,
                "edge handled {} times (action {action:?}, replay {replay:?})",
                u8::from(started_by_isr) + u8::from(replayed_by_task)
            );
        }
    }

    #[test]
    fn state_names() {
        assert_eq!(HandshakeState::CoolingDown.to_string(), "cooling-down");
        assert_eq!(HandshakeState::RequestingSend.as_str(), "requesting-send");
    }
}
