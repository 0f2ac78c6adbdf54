//! In-process simulated wire.
//!
//! [`pair`] returns two connected [`SimPort`]s. Each port owns an interrupt
//! thread that plays the role of the MCU interrupt controller: request pulses
//! and exchange completions are delivered there, one at a time, to the
//! attached [`LinkEvents`] handler.
//!
//! An exchange is clocked as soon as both sides have queued a transfer. Each
//! side then receives the envelope the other side queued (full duplex).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{LinkError, Result};
use crate::traits::{LinkEvents, LinkPort, Peripheral, Signals, Status};

type HandlerCell = Arc<Mutex<Option<Weak<dyn LinkEvents>>>>;

enum Irq {
    RequestEdge,
    ExchangeComplete(Box<[u8]>),
}

/// A single bit to corrupt in the next envelope delivered to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitFlip {
    /// Byte offset inside the envelope.
    pub byte: usize,
    /// Bit index, 0 = least significant.
    pub bit: u8,
}

struct Wire {
    envelope_len: usize,
    busy: [AtomicBool; 2],
    queued: Mutex<[Option<Box<[u8]>>; 2]>,
    flips: Mutex<[Option<BitFlip>; 2]>,
    irq: [IrqLine; 2],
    exchanges: AtomicU64,
}

/// Interrupt request line into one side's interrupt thread.
struct IrqLine {
    tx: Sender<Irq>,
    pending: Arc<AtomicUsize>,
}

impl IrqLine {
    fn raise(&self, irq: Irq) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // A closed channel means the port was dropped.
        if self.tx.send(irq).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Wire {
    /// Deliver one completed exchange to both sides.
    fn clock(&self, from_a: Box<[u8]>, from_b: Box<[u8]>) {
        let mut to_a = from_b;
        let mut to_b = from_a;

        {
            let mut flips = self.flips.lock();
            if let Some(flip) = flips[0].take() {
                apply_flip(&mut to_a, flip);
            }
            if let Some(flip) = flips[1].take() {
                apply_flip(&mut to_b, flip);
            }
        }

        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(exchange = n, "sim wire clocked exchange");

        self.irq[0].raise(Irq::ExchangeComplete(to_a));
        self.irq[1].raise(Irq::ExchangeComplete(to_b));
    }
}

fn apply_flip(buf: &mut [u8], flip: BitFlip) {
    if let Some(byte) = buf.get_mut(flip.byte) {
        *byte ^= 1u8 << (flip.bit & 7);
    }
}

/// One end of a simulated spinet wire.
pub struct SimPort {
    side: usize,
    wire: Arc<Wire>,
    handler: HandlerCell,
}

/// Create two connected ports moving `envelope_len` bytes per exchange.
pub fn pair(envelope_len: usize) -> Result<(SimPort, SimPort)> {
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let pending_a = Arc::new(AtomicUsize::new(0));
    let pending_b = Arc::new(AtomicUsize::new(0));

    let wire = Arc::new(Wire {
        envelope_len,
        busy: [AtomicBool::new(false), AtomicBool::new(false)],
        queued: Mutex::new([None, None]),
        flips: Mutex::new([None, None]),
        irq: [
            IrqLine {
                tx: tx_a,
                pending: Arc::clone(&pending_a),
            },
            IrqLine {
                tx: tx_b,
                pending: Arc::clone(&pending_b),
            },
        ],
        exchanges: AtomicU64::new(0),
    });

    let handler_a: HandlerCell = Arc::new(Mutex::new(None));
    let handler_b: HandlerCell = Arc::new(Mutex::new(None));

    spawn_irq_thread("spinet-sim-irq-a", rx_a, Arc::clone(&handler_a), pending_a)?;
    spawn_irq_thread("spinet-sim-irq-b", rx_b, Arc::clone(&handler_b), pending_b)?;

    debug!(envelope_len, "created simulated wire");

    Ok((
        SimPort {
            side: 0,
            wire: Arc::clone(&wire),
            handler: handler_a,
        },
        SimPort {
            side: 1,
            wire,
            handler: handler_b,
        },
    ))
}

fn spawn_irq_thread(
    name: &str,
    rx: Receiver<Irq>,
    handler: HandlerCell,
    pending: Arc<AtomicUsize>,
) -> Result<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run_irq(rx, handler, pending))
        .map(|_| ())
        .map_err(|err| LinkError::Peripheral(format!("failed to spawn interrupt thread: {err}")))
}

fn run_irq(rx: Receiver<Irq>, handler: HandlerCell, pending: Arc<AtomicUsize>) {
    // Ends once both ports (and with them the wire's senders) are dropped.
    while let Ok(irq) = rx.recv() {
        let events = handler.lock().as_ref().and_then(Weak::upgrade);
        match (events, irq) {
            (None, _) => trace!("interrupt raised with no handler attached"),
            (Some(events), Irq::RequestEdge) => events.on_request_edge(),
            (Some(events), Irq::ExchangeComplete(rx)) => events.on_exchange_complete(&rx),
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimPort {
    fn peer(&self) -> usize {
        1 - self.side
    }

    /// Interrupts raised for this port that its handler has not finished.
    pub fn pending_interrupts(&self) -> usize {
        self.wire.irq[self.side].pending.load(Ordering::SeqCst)
    }

    /// Wait until every interrupt raised for this port has been handled.
    pub fn wait_quiet(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.pending_interrupts() > 0 {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::yield_now();
        }
        true
    }

    /// Level currently driven on this port's `status_out`.
    pub fn status(&self) -> Status {
        Status::from_level(self.wire.busy[self.side].load(Ordering::SeqCst))
    }

    /// Whether this port has an exchange queued and waiting for the peer.
    pub fn is_queued(&self) -> bool {
        self.wire.queued.lock()[self.side].is_some()
    }

    /// Total exchanges clocked on this wire.
    pub fn exchanges(&self) -> u64 {
        self.wire.exchanges.load(Ordering::SeqCst)
    }

    /// Corrupt one bit of the next envelope this port receives.
    pub fn inject_bit_flip(&self, flip: BitFlip) {
        self.wire.flips.lock()[self.side] = Some(flip);
    }
}

impl Signals for SimPort {
    fn set_status(&self, status: Status) {
        self.wire.busy[self.side].store(status.level(), Ordering::SeqCst);
    }

    fn peer_status(&self) -> Status {
        Status::from_level(self.wire.busy[self.peer()].load(Ordering::SeqCst))
    }

    fn pulse_request(&self) {
        self.wire.irq[self.peer()].raise(Irq::RequestEdge);
    }
}

impl Peripheral for SimPort {
    fn envelope_len(&self) -> usize {
        self.wire.envelope_len
    }

    fn queue_exchange(&self, tx: &[u8]) -> Result<()> {
        if tx.len() != self.wire.envelope_len {
            return Err(LinkError::EnvelopeMismatch {
                expected: self.wire.envelope_len,
                actual: tx.len(),
            });
        }

        let mut queued = self.wire.queued.lock();
        if queued[self.side].is_some() {
            return Err(LinkError::AlreadyQueued);
        }
        queued[self.side] = Some(tx.into());

        if queued.iter().any(Option::is_none) {
            return Ok(());
        }
        let (Some(a), Some(b)) = (queued[0].take(), queued[1].take()) else {
            return Ok(());
        };
        drop(queued);

        self.wire.clock(a, b);
        Ok(())
    }

    fn cancel_exchange(&self) -> bool {
        self.wire.queued.lock()[self.side].take().is_some()
    }
}

impl LinkPort for SimPort {
    fn attach(&self, events: Weak<dyn LinkEvents>) -> Result<()> {
        let mut handler = self.handler.lock();
        if handler.as_ref().and_then(Weak::upgrade).is_some() {
            return Err(LinkError::AlreadyAttached);
        }
        *handler = Some(events);
        Ok(())
    }
}

impl std::fmt::Debug for SimPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPort")
            .field("side", &if self.side == 0 { "a" } else { "b" })
            .field("envelope_len", &self.wire.envelope_len)
            .finish()
    }
}
