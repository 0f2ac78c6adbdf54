use std::sync::Weak;

use crate::error::Result;

/// Level of a status line.
///
/// On the wire `Busy` is driven high and `Ready` low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The side can accept a new exchange.
    Ready,
    /// The side is mid-transfer or about to start one.
    Busy,
}

impl Status {
    /// Interpret a raw pin level (high = busy).
    pub fn from_level(high: bool) -> Self {
        if high {
            Self::Busy
        } else {
            Self::Ready
        }
    }

    /// The raw pin level for this status (high = busy).
    pub fn level(self) -> bool {
        matches!(self, Self::Busy)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Out-of-band handshake signals.
///
/// Every method must be callable from interrupt context: no blocking, no allocation.
pub trait Signals: Send + Sync {
    /// Drive this side's `status_out` line.
    fn set_status(&self, status: Status);

    /// Sample the peer's `status_out` line (our `status_in`).
    ///
    /// Polled, not latched: the value may already be stale when it returns.
    fn peer_status(&self) -> Status;

    /// Pulse `request_out` once (high then low). The peer sees a falling edge.
    fn pulse_request(&self);
}

/// The synchronous serial peripheral moving one envelope per exchange.
pub trait Peripheral: Send + Sync {
    /// Size in bytes of every exchange on this link.
    fn envelope_len(&self) -> usize;

    /// Queue one full-duplex exchange sending `tx`.
    ///
    /// The bytes are copied into the driver before returning. Completion is
    /// reported through [`LinkEvents::on_exchange_complete`].
    fn queue_exchange(&self, tx: &[u8]) -> Result<()>;

    /// Drop a queued exchange that has not started yet.
    ///
    /// Returns `true` if something was dequeued. An exchange already on the
    /// wire runs to completion.
    fn cancel_exchange(&self) -> bool;
}

/// Interrupt entry points implemented by the layer above.
///
/// Backends invoke these from their interrupt context. Implementations must
/// run in bounded time and must not block or allocate.
pub trait LinkEvents: Send + Sync {
    /// A falling edge was seen on `request_in`.
    fn on_request_edge(&self);

    /// An exchange finished; `rx` holds the envelope received from the peer.
    fn on_exchange_complete(&self, rx: &[u8]);
}

/// A complete link backend: signals, peripheral and interrupt registration.
pub trait LinkPort: Signals + Peripheral {
    /// Install the interrupt handlers for this port.
    ///
    /// Held weakly so the port never keeps its owner alive.
    fn attach(&self, events: Weak<dyn LinkEvents>) -> Result<()>;
}
