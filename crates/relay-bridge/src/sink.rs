// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Destination for outbound frames

use crate::events::OutboundEvent;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::info;

/// Where a turn's frames go.
///
/// A channel-backed sink detaches for good the first time the receiver is
/// gone; later sends are dropped silently so the turn can finish in the
/// background. A discarding sink is used for buffered requests.
#[derive(Debug)]
pub struct FrameSink {
    tx: Option<mpsc::Sender<OutboundEvent>>,
    sent: AtomicUsize,
    detached: AtomicBool,
}

impl FrameSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    pub fn from_sender(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            tx: Some(tx),
            sent: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    pub fn discard() -> Self {
        Self {
            tx: None,
            sent: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    /// Deliver one frame; `false` once the consumer is gone or for a
    /// discarding sink
    pub async fn send(&self, frame: OutboundEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if self.detached.load(Ordering::Acquire) {
            return false;
        }
        if tx.send(frame).await.is_err() {
            self.detached.store(true, Ordering::Release);
            info!(sent = self.frames_sent(), "Caller disconnected; no further frames will be sent");
            return false;
        }
        self.sent.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub async fn send_all(&self, frames: impl IntoIterator<Item = OutboundEvent> + Send) {
        for frame in frames {
            self.send(frame).await;
        }
    }

    /// Frames a consumer actually received
    pub fn frames_sent(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}
