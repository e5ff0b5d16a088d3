//! Delayed re-enqueue of failed steps
//!
//! A single task owns a `DelayQueue`. Retries are handed to it over a channel
//! and pushed back onto the work queue once their delay expires, so waiting
//! never occupies a worker.

use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

use super::executor::WorkItem;
use crate::workflow::definition::MAX_RETRY_DELAY_SECONDS;

/// Delays are capped well below the `DelayQueue` limit of roughly two years
const MAX_DELAY: Duration = Duration::from_secs(MAX_RETRY_DELAY_SECONDS);

/// Handle for scheduling delayed work
#[derive(Debug, Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<(WorkItem, Duration)>,
}

impl RetryQueue {
    /// Spawn the delay task. Expired items are sent to `work_tx`.
    pub fn spawn(
        work_tx: async_channel::Sender<WorkItem>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, work_tx, cancel));
        (Self { tx }, handle)
    }

    /// Re-enqueue `item` after `delay`. Returns false once the queue is gone.
    pub fn schedule(&self, item: WorkItem, delay: Duration) -> bool {
        self.tx.send((item, delay)).is_ok()
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<(WorkItem, Duration)>,
    work_tx: async_channel::Sender<WorkItem>,
    cancel: CancellationToken,
) {
    let mut queue: DelayQueue<WorkItem> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some((item, delay)) = rx.recv() => {
                if delay > MAX_DELAY {
                    warn!(instance_id = %item.instance_id, ?delay, max = ?MAX_DELAY, "Retry delay capped");
                }
                let delay = delay.min(MAX_DELAY);
                debug!(instance_id = %item.instance_id, step_index = item.step_index, ?delay, "Retry scheduled");
                queue.insert(item, delay);
            }
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let item = expired.into_inner();
                if work_tx.send(item).await.is_err() {
                    warn!("Work queue closed, dropping pending retries");
                    break;
                }
            }
        }
    }

    if !queue.is_empty() {
        debug!(pending = queue.len(), "Retry queue stopped with pending items");
    }
}
