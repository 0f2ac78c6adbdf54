use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use spinet_frame::{encode, FrameConfig};
use spinet_link::LinkPort;

use crate::error::{EndpointError, Result};

/// Queues exchanges on the peripheral, one at a time.
///
/// Owns the transmit envelope. `in_flight` is raised before the exchange is
/// queued and cleared by the completion interrupt, so a completion that fires
/// before [`start_exchange`](Self::start_exchange) returns is still seen.
///
/// Every [`reset`](Self::reset) bumps a generation counter. A queue that
/// started before a reset withdraws its exchange instead of leaving it
/// queued behind an idle link.
pub struct TransferEngine {
    port: Arc<dyn LinkPort>,
    config: FrameConfig,
    tx: Mutex<Box<[u8]>>,
    in_flight: AtomicBool,
    generation: AtomicU64,
}

impl TransferEngine {
    pub fn new(port: Arc<dyn LinkPort>, config: FrameConfig) -> Result<Self> {
        if port.envelope_len() != config.envelope_len() {
            return Err(EndpointError::Config(format!(
                "link moves {} byte envelopes, config expects {}",
                port.envelope_len(),
                config.envelope_len()
            )));
        }
        Ok(Self {
            port,
            tx: Mutex::new(vec![0u8; config.envelope_len()].into_boxed_slice()),
            config,
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Encode `payload` (or an all-zero filler for `None`) and queue it.
    ///
    /// Fails with `Busy` if a reset withdrew the exchange while it was being
    /// queued. Task context only.
    pub fn start_exchange(&self, payload: Option<&[u8]>) -> Result<()> {
        if self.start_exchange_since(payload, self.generation())? {
            Ok(())
        } else {
            Err(EndpointError::Busy)
        }
    }

    /// Like [`start_exchange`](Self::start_exchange), but only if no reset
    /// happened since `generation` was read.
    ///
    /// `Ok(false)` means a reset got there first and nothing is left queued.
    /// The caller read `generation` before deciding to queue, so a reset that
    /// lands anywhere between that decision and the peripheral accepting the
    /// envelope is caught. Task context only.
    pub fn start_exchange_since(&self, payload: Option<&[u8]>, generation: u64) -> Result<bool> {
        if let Some(payload) = payload {
            let max = self.config.max_payload();
            if payload.len() > max {
                return Err(EndpointError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EndpointError::Busy);
        }

        let mut tx = self.tx.lock();
        if self.generation() != generation {
            self.in_flight.store(false, Ordering::SeqCst);
            return Ok(false);
        }

        let queued = match payload {
            Some(payload) => encode(payload, &mut tx, &self.config)
                .map_err(EndpointError::from)
                .and_then(|_| self.port.queue_exchange(&tx).map_err(EndpointError::from)),
            None => {
                tx.fill(0);
                self.port.queue_exchange(&tx).map_err(EndpointError::from)
            }
        };

        if let Err(err) = queued {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(err);
        }

        // A reset while the envelope was being handed over found nothing to
        // cancel. Only this call can have queued, since it holds `tx`.
        // `in_flight` is left alone: the reset cleared it and a new claim may
        // already own it.
        if self.generation() != generation {
            self.port.cancel_exchange();
            return Ok(false);
        }
        Ok(true)
    }

    /// Mark the exchange finished. Interrupt safe.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn complete(&self) -> bool {
        self.in_flight.swap(false, Ordering::SeqCst)
    }

    /// Drop a queued exchange and clear `in_flight`.
    ///
    /// Returns `true` if the peripheral still held a queued exchange.
    pub fn reset(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let cancelled = self.port.cancel_exchange();
        self.in_flight.store(false, Ordering::SeqCst);
        cancelled
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("envelope_len", &self.config.envelope_len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
