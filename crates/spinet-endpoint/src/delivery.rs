//! Async upward path.
//!
//! [`channel`] pairs an [`Adapter`] with a [`DeliveryStream`] so frames can be
//! consumed from a tokio task. The dispatcher thread never awaits: a full
//! channel drops the frame.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::adapter::Adapter;

/// Create an adapter/stream pair buffering up to `capacity` frames.
pub fn channel(capacity: usize) -> (AsyncAdapter, DeliveryStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        AsyncAdapter {
            tx,
            dropped: AtomicU64::new(0),
        },
        DeliveryStream { rx },
    )
}

#[derive(Debug)]
pub struct AsyncAdapter {
    tx: mpsc::Sender<Bytes>,
    dropped: AtomicU64,
}

impl AsyncAdapter {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Adapter for AsyncAdapter {
    fn deliver_frame(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(len = frame.len(), "delivery stream full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug)]
pub struct DeliveryStream {
    rx: mpsc::Receiver<Bytes>,
}

impl DeliveryStream {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for DeliveryStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
