//! Asynchronous batched soft-delete pipeline.
//!
//! Callers hand ids to [`DeleteBatcher::submit`] and return immediately.
//! Each submission spawns a short-lived producer that emits pending deletes
//! one at a time into a per-call relay channel, and a worker that forwards
//! them into the single shared delete channel (fan-in). One long-lived
//! consumer buffers entries and flushes them to a [`DeleteSink`] when the
//! buffer is full or when the ticker fires, whichever comes first.
//!
//! Deletion is best-effort: a failed flush is logged and the batch dropped,
//! and nothing is retried or persisted. [`DeleteBatcher::shutdown`] waits for
//! submissions already accepted; a process that exits without it loses them.

use async_trait::async_trait;
use linkvault_core::{PendingDelete, RepositoryError, Result, ShortId};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};
use typed_builder::TypedBuilder;

/// Smallest bounded capacity tokio offers; senders wait for the consumer.
const RENDEZVOUS: usize = 1;

/// Where flushed batches go.
#[async_trait]
pub trait DeleteSink: Send + Sync + 'static {
    /// Marks every entry of `batch` deleted, scoped by its owner, atomically.
    async fn mark_deleted(&self, batch: &[PendingDelete]) -> Result<()>;
}

/// Tuning of the delete pipeline.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BatcherConfig {
    /// Buffered entries that trigger an immediate flush.
    #[builder(default = 10)]
    pub batch_size: usize,
    /// Period of the ticker that flushes partially filled buffers.
    #[builder(default = Duration::from_secs(1))]
    pub flush_interval: Duration,
    /// Upper bound for a single flush.
    #[builder(default = Duration::from_secs(4))]
    pub flush_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Handle to the running delete pipeline.
#[derive(Debug)]
pub struct DeleteBatcher {
    // `None` once shut down
    deletes: Mutex<Option<mpsc::Sender<PendingDelete>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    ticker: JoinHandle<()>,
}

impl DeleteBatcher {
    /// Starts the consumer and the ticker. Must be called within a tokio runtime.
    pub fn spawn<S: DeleteSink>(sink: S, config: BatcherConfig) -> Self {
        let (deletes_tx, deletes_rx) = mpsc::channel(RENDEZVOUS);
        let (flush_tx, flush_rx) = mpsc::channel(RENDEZVOUS);

        let batch_size = config.batch_size.max(1);
        let consumer = tokio::spawn(consume(
            sink,
            deletes_rx,
            flush_rx,
            batch_size,
            config.flush_timeout,
        ));
        let flush_interval = config.flush_interval.max(Duration::from_millis(1));
        let ticker = tokio::spawn(tick(flush_tx, flush_interval));

        debug!(
            batch_size,
            flush_interval = ?flush_interval,
            "delete batcher started"
        );

        Self {
            deletes: Mutex::new(Some(deletes_tx)),
            consumer: Mutex::new(Some(consumer)),
            ticker,
        }
    }

    /// Enqueues `ids` of `owner` for deletion and returns without waiting.
    ///
    /// Fails only when the batcher has been shut down.
    pub fn submit(&self, owner: &str, ids: Vec<ShortId>) -> Result<()> {
        let Some(deletes) = self.deletes.lock().clone() else {
            return Err(RepositoryError::StorageUnavailable(
                "delete batcher is closed".to_string(),
            ));
        };

        if ids.is_empty() {
            return Ok(());
        }

        trace!(owner = %owner, count = ids.len(), "submitting deletes");
        let (relay_tx, relay_rx) = mpsc::channel(RENDEZVOUS);
        tokio::spawn(produce(relay_tx, owner.to_owned(), ids));
        tokio::spawn(forward(relay_rx, deletes));
        Ok(())
    }

    /// Stops accepting submissions and waits until every accepted entry has
    /// been flushed.
    ///
    /// The shared channel closes once the last in-flight forwarder has handed
    /// over its entries; the consumer then flushes its buffer and exits.
    pub async fn shutdown(&self) {
        drop(self.deletes.lock().take());

        let consumer = self.consumer.lock().take();
        let Some(consumer) = consumer else {
            return;
        };

        if let Err(e) = consumer.await {
            error!(error = %e, "delete batcher consumer failed");
        }
        self.ticker.abort();
        debug!("delete batcher stopped");
    }
}

impl Drop for DeleteBatcher {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

async fn produce(relay: mpsc::Sender<PendingDelete>, owner: String, ids: Vec<ShortId>) {
    for (position, id) in ids.into_iter().enumerate() {
        let pending = PendingDelete {
            owner: owner.clone(),
            id,
        };
        if relay.send(pending).await.is_err() {
            break;
        }
        trace!(position, "pending delete relayed");
    }
}

async fn forward(mut relay: mpsc::Receiver<PendingDelete>, deletes: mpsc::Sender<PendingDelete>) {
    while let Some(pending) = relay.recv().await {
        if let Err(mpsc::error::SendError(lost)) = deletes.send(pending).await {
            warn!(
                owner = %lost.owner,
                id = %lost.id,
                "delete batcher closed, dropping pending delete"
            );
            break;
        }
    }
}

async fn tick(flushes: mpsc::Sender<()>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        if flushes.send(()).await.is_err() {
            break;
        }
    }
}

async fn consume<S: DeleteSink>(
    sink: S,
    mut deletes: mpsc::Receiver<PendingDelete>,
    mut flushes: mpsc::Receiver<()>,
    batch_size: usize,
    flush_timeout: Duration,
) {
    let mut buffer = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            pending = deletes.recv() => match pending {
                Some(pending) => {
                    buffer.push(pending);
                    if buffer.len() >= batch_size {
                        flush(&sink, &mut buffer, flush_timeout).await;
                    }
                }
                // every sender is gone: shut down and all forwarders done
                None => {
                    flush(&sink, &mut buffer, flush_timeout).await;
                    break;
                }
            },
            Some(()) = flushes.recv() => flush(&sink, &mut buffer, flush_timeout).await,
        }
    }
}

async fn flush<S: DeleteSink>(sink: &S, buffer: &mut Vec<PendingDelete>, timeout: Duration) {
    if buffer.is_empty() {
        return;
    }

    let count = buffer.len();
    match tokio::time::timeout(timeout, sink.mark_deleted(buffer)).await {
        Ok(Ok(())) => debug!(count, "flushed delete batch"),
        Ok(Err(e)) => error!(count, error = %e, "delete batch failed, dropping it"),
        Err(_) => error!(count, timeout = ?timeout, "delete batch timed out, dropping it"),
    }
    buffer.clear();
}
