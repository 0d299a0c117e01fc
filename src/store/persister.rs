use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::AppError;
use crate::store::{KeyValueStore, Snapshot};

/// A pending write waits at most this many debounce delays, however often
/// it is rescheduled.
const MAX_WAIT_FACTOR: u32 = 4;

enum Command {
    /// Write after `delay` of quiet; later schedules reset the timer, up to
    /// the max-wait bound.
    Schedule(Snapshot),
    /// Write now, together with anything still pending.
    Flush(Snapshot, oneshot::Sender<Result<(), AppError>>),
}

/// Background writer that coalesces high-frequency updates.
///
/// Per-delta changes go through `schedule` (trailing debounce); structural
/// changes go through `flush`, which writes immediately and absorbs any
/// pending debounced snapshot. A steady stream of schedules still writes at
/// least every `MAX_WAIT_FACTOR * delay`, so a crash loses at most that much
/// scheduled work.
pub struct Persister {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
    delay: Duration,
}

impl Persister {
    pub fn spawn(store: Arc<dyn KeyValueStore>, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(store, delay, rx));
        Self { tx, handle, delay }
    }

    /// Throttle for callers that would otherwise snapshot on every change.
    pub fn throttle(&self) -> SnapshotThrottle {
        SnapshotThrottle::new(self.delay)
    }

    pub fn schedule(&self, snapshot: Snapshot) {
        if self.tx.send(Command::Schedule(snapshot)).is_err() {
            tracing::warn!("persister stopped; dropping scheduled write");
        }
    }

    pub async fn flush(&self, snapshot: Snapshot) -> Result<(), AppError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(snapshot, ack))
            .map_err(|_| AppError::Store("persister stopped".to_string()))?;
        done.await
            .map_err(|_| AppError::Store("persister stopped before acknowledging".to_string()))?
    }

    /// Stop the writer after it drains pending work.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!("persister task failed: {e}");
        }
    }
}

async fn run(
    store: Arc<dyn KeyValueStore>,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let max_wait = delay * MAX_WAIT_FACTOR;
    let mut pending: Option<Snapshot> = None;
    let mut pending_since = Instant::now();
    let mut deadline = Instant::now();

    loop {
        let command = if pending.is_some() {
            tokio::select! {
                command = rx.recv() => command,
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(snapshot) = pending.take() {
                        write_logged(&*store, &snapshot).await;
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(Command::Schedule(snapshot)) => {
                let now = Instant::now();
                let merged = match pending.take() {
                    Some(mut p) => {
                        p.merge(snapshot);
                        p
                    }
                    None => {
                        pending_since = now;
                        snapshot
                    }
                };
                pending = Some(merged);
                deadline = (now + delay).min(pending_since + max_wait);
            }
            Some(Command::Flush(snapshot, ack)) => {
                let mut merged = pending.take().unwrap_or_default();
                merged.merge(snapshot);
                let result = merged.write_to(&*store).await;
                if let Err(e) = &result {
                    tracing::warn!("persist flush failed: {e}");
                }
                let _ = ack.send(result);
            }
            None => {
                if let Some(snapshot) = pending.take() {
                    write_logged(&*store, &snapshot).await;
                }
                break;
            }
        }
    }
}

async fn write_logged(store: &dyn KeyValueStore, snapshot: &Snapshot) {
    if let Err(e) = snapshot.write_to(store).await {
        tracing::warn!("debounced persist failed: {e}");
    }
}

/// Rate limit for building snapshots: at most one per interval. Whatever is
/// skipped is picked up by the next snapshot or by the caller's final flush.
#[derive(Debug, Clone)]
pub struct SnapshotThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl SnapshotThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a snapshot is due now. Marks it taken when it is.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        if self.last.is_some_and(|at| now.duration_since(at) < self.interval) {
            return false;
        }
        self.last = Some(now);
        true
    }
}
