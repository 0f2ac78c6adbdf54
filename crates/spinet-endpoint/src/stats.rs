use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Link counters. Every update is a relaxed increment, so they are safe to
/// bump from interrupt context.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames_sent: AtomicU64,
    busy_rejections: AtomicU64,
    exchanges_completed: AtomicU64,
    frames_delivered: AtomicU64,
    empty_frames: AtomicU64,
    invalid_frames: AtomicU64,
    overwritten_frames: AtomicU64,
    lock_timeouts: AtomicU64,
    isr_contended: AtomicU64,
    alloc_failures: AtomicU64,
    recoveries: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub busy_rejections: u64,
    pub exchanges_completed: u64,
    pub frames_delivered: u64,
    pub empty_frames: u64,
    pub invalid_frames: u64,
    pub overwritten_frames: u64,
    pub lock_timeouts: u64,
    pub isr_contended: u64,
    pub alloc_failures: u64,
    pub recoveries: u64,
}

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        impl LinkStats {
            $(
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    frames_sent => record_sent,
    busy_rejections => record_busy,
    exchanges_completed => record_exchange,
    frames_delivered => record_delivered,
    empty_frames => record_empty,
    invalid_frames => record_invalid,
    overwritten_frames => record_overwritten,
    lock_timeouts => record_lock_timeout,
    isr_contended => record_isr_contended,
    alloc_failures => record_alloc_failure,
    recoveries => record_recovery,
}
