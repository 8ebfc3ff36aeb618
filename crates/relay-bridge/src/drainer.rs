// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Line-delimited record reader with a post-EOF drain phase
//!
//! Every byte read from the source is appended to a shared [`CaptureBuffer`]
//! and lines are cut from that buffer, never from the reader directly. When
//! the source reports end of input the drainer waits a settle interval and
//! then rescans the buffer from its consumed offset, so output that the
//! CLI's finalization step flushes late is still yielded.

use crate::error::{BridgeError, BridgeResult};
use crate::events::RawEvent;
use relay_logging::preview;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Shared, append-only copy of everything the source produced
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, data: &[u8]) {
        self.bytes.lock().await.extend_from_slice(data);
    }

    pub async fn len(&self) -> usize {
        self.bytes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bytes.lock().await.is_empty()
    }

    /// Copy of the captured bytes
    pub async fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().await.clone()
    }
}

/// Wakes the process supervisor whenever output arrives
#[derive(Debug, Clone, Default)]
pub struct ActivitySignal {
    notify: Arc<Notify>,
}

impl ActivitySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Draining,
    Finished,
}

/// Turns a byte source into [`RawEvent`] records
pub struct EventDrainer<R> {
    source: R,
    buffer: CaptureBuffer,
    consumed: usize,
    phase: Phase,
    settle: Duration,
    activity: Option<ActivitySignal>,
    lines: usize,
    skipped: usize,
}

impl<R> EventDrainer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(source: R, settle: Duration) -> Self {
        Self {
            source,
            buffer: CaptureBuffer::new(),
            consumed: 0,
            phase: Phase::Streaming,
            settle,
            activity: None,
            lines: 0,
            skipped: 0,
        }
    }

    /// Signal `activity` on every chunk read
    pub fn with_activity(mut self, activity: ActivitySignal) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Handle on the capture buffer
    pub fn buffer(&self) -> CaptureBuffer {
        self.buffer.clone()
    }

    /// Lines yielded so far
    pub fn lines_read(&self) -> usize {
        self.lines
    }

    /// Lines that failed to decode
    pub fn lines_skipped(&self) -> usize {
        self.skipped
    }

    /// Next decodable record; malformed lines are logged and skipped
    pub async fn next_record(&mut self) -> BridgeResult<Option<RawEvent>> {
        while let Some(line) = self.next_line().await? {
            match RawEvent::from_line(&line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(error = %e, line = %preview(&line, 200), "Skipping malformed output line");
                }
            }
        }
        Ok(None)
    }

    /// Next non-empty line, without the trailing newline
    pub async fn next_line(&mut self) -> BridgeResult<Option<String>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.take_line().await {
                self.lines += 1;
                return Ok(Some(line));
            }

            match self.phase {
                Phase::Streaming => {
                    let n = self.source.read(&mut chunk).await.map_err(BridgeError::Stream)?;
                    if n == 0 {
                        debug!(settle = ?self.settle, lines = self.lines, "End of output; settling before final rescan");
                        tokio::time::sleep(self.settle).await;
                        self.phase = Phase::Draining;
                        continue;
                    }
                    self.buffer.append(&chunk[..n]).await;
                    if let Some(activity) = &self.activity {
                        activity.touch();
                    }
                }
                Phase::Draining => {
                    self.phase = Phase::Finished;
                    if let Some(rest) = self.take_remainder().await {
                        self.lines += 1;
                        return Ok(Some(rest));
                    }
                    return Ok(None);
                }
                Phase::Finished => return Ok(None),
            }
        }
    }

    async fn take_line(&mut self) -> Option<String> {
        let bytes = self.buffer.bytes.lock().await;
        while let Some(offset) = bytes[self.consumed..].iter().position(|b| *b == b'\n') {
            let end = self.consumed + offset;
            let line = decode(&bytes[self.consumed..end]);
            self.consumed = end + 1;
            if !line.trim().is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Unterminated tail, only once the source is exhausted
    async fn take_remainder(&mut self) -> Option<String> {
        let bytes = self.buffer.bytes.lock().await;
        if self.consumed >= bytes.len() {
            return None;
        }
        let line = decode(&bytes[self.consumed..]);
        self.consumed = bytes.len();
        trace!(len = line.len(), "Unterminated final line");
        (!line.trim().is_empty()).then_some(line)
    }
}

fn decode(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn yields_lines_across_chunk_boundaries() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut drainer = EventDrainer::new(rx, Duration::from_millis(10));

        tokio::spawn(async move {
            tx.write_all(b"{\"a\":").await.unwrap();
            tx.write_all(b"1}\r\n\n{\"b\":2}\n").await.unwrap();
        });

        assert_eq!(drainer.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(drainer.next_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(drainer.next_line().await.unwrap(), None);
        assert_eq!(drainer.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unterminated_tail_is_yielded_last() {
        let source: &[u8] = b"first\nsecond";
        let mut drainer = EventDrainer::new(source, Duration::ZERO);

        assert_eq!(drainer.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(drainer.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(drainer.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let source: &[u8] = b"not json\n{\"type\":\"assistant\"}\n{broken\n";
        let mut drainer = EventDrainer::new(source, Duration::ZERO);

        assert_eq!(drainer.next_record().await.unwrap(), Some(RawEvent::Other));
        assert_eq!(drainer.next_record().await.unwrap(), None);
        assert_eq!(drainer.lines_skipped(), 2);
    }

    #[tokio::test]
    async fn activity_is_signalled_per_chunk() {
        let activity = ActivitySignal::new();
        let source: &[u8] = b"line\n";
        let mut drainer = EventDrainer::new(source, Duration::ZERO).with_activity(activity.clone());

        drainer.next_line().await.unwrap();

        tokio::time::timeout(Duration::from_millis(100), activity.notified())
            .await
            .expect("activity should have been signalled");
    }
}
