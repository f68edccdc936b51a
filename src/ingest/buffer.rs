//! Write buffer between the tailer and the event store.

use super::RequestEvent;
use crate::store::EventStore;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Default interval between buffer flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Flushes larger than this are logged at info level.
const LOUD_FLUSH_THRESHOLD: u64 = 100;

/// Sending half handed to producers (the tailer). Unbounded so the poll loop
/// never waits on the store.
pub type EventSender = mpsc::UnboundedSender<Vec<RequestEvent>>;
pub type EventReceiver = mpsc::UnboundedReceiver<Vec<RequestEvent>>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Owns the in-memory buffer and periodically batch-inserts it.
///
/// A failed insert puts the batch back at the head of the buffer for the next
/// tick, which makes ingestion at-least-once across store failures. The
/// buffer is only ever touched through `&mut self`, so flushes cannot overlap.
pub struct BufferFlusher {
    receiver: EventReceiver,
    store: Arc<dyn EventStore>,
    buffer: VecDeque<RequestEvent>,
    flush_interval: Duration,
}

impl BufferFlusher {
    pub fn new(
        receiver: EventReceiver,
        store: Arc<dyn EventStore>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            receiver,
            store,
            buffer: VecDeque::new(),
            flush_interval,
        }
    }

    /// Number of events waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Move everything already queued on the channel into the buffer.
    pub fn drain_channel(&mut self) {
        while let Ok(events) = self.receiver.try_recv() {
            self.buffer.extend(events);
        }
    }

    /// Insert the whole buffer as one batch.
    pub async fn flush(&mut self) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch: Vec<RequestEvent> = self.buffer.drain(..).collect();
        match self.store.insert_events(&batch).await {
            Ok(inserted) => {
                if inserted > LOUD_FLUSH_THRESHOLD {
                    info!(records = inserted, "Flushed buffered request events");
                }
                Ok(inserted)
            }
            Err(e) => {
                warn!(
                    retained = batch.len(),
                    error = %e,
                    "Failed to flush request events, retrying next tick"
                );
                let mut restored = VecDeque::from(batch);
                restored.append(&mut self.buffer);
                self.buffer = restored;
                Err(e)
            }
        }
    }

    /// Run until every sender is dropped, then drain and flush one last time.
    ///
    /// Consuming `self` makes this task the only flusher of the buffer. A
    /// flush is awaited inside its tick arm, so ticks that fall due while it
    /// runs are skipped rather than started alongside it.
    pub async fn run(mut self) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(events) => self.buffer.extend(events),
                    None => break,
                },
                _ = ticker.tick() => {
                    // failure already logged; the batch stays buffered
                    let _ = self.flush().await;
                }
            }
        }

        self.drain_channel();
        if let Err(e) = self.flush().await {
            error!(
                lost = self.buffer.len(),
                error = %e,
                "Final flush failed, buffered events dropped"
            );
        }
    }
}
