//! Public pipeline handle: enqueue with dedup.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PipelineError;
use crate::task::{DedupKey, WriteOutcome, WriteTask, WriteTicket};
use crate::writer::{run_writer, CommitNotice, PipelineConfig, QueuedTask, WriteBackend};

/// Handle to the write pipeline. Clones share the same writer; dropping
/// every clone closes the queue and the writer drains then exits.
#[derive(Clone)]
pub struct WritePipeline {
    tx: mpsc::Sender<QueuedTask>,
    pending: Arc<DashMap<DedupKey, watch::Receiver<Option<WriteOutcome>>>>,
}

impl WritePipeline {
    /// Spawn the dedicated writer over the given backend.
    ///
    /// Returns the handle, the writer's join handle (await it after
    /// dropping the pipeline to observe drain), and the commit-notice
    /// stream for opportunistic index refresh.
    pub fn spawn<B: WriteBackend>(
        backend: Arc<B>,
        config: PipelineConfig,
    ) -> (Self, JoinHandle<()>, mpsc::UnboundedReceiver<CommitNotice>) {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let pending: Arc<DashMap<DedupKey, watch::Receiver<Option<WriteOutcome>>>> =
            Arc::new(DashMap::new());

        let writer = tokio::spawn(run_writer(
            backend,
            rx,
            pending.clone(),
            config,
            commit_tx,
        ));

        (Self { tx, pending }, writer, commit_rx)
    }

    /// Enqueue a task, coalescing onto an in-flight task when one already
    /// covers the same dedup key.
    pub async fn enqueue(&self, task: WriteTask) -> Result<WriteTicket, PipelineError> {
        let key = task.dedup_key();

        // Reserve the key (or join the task already holding it). The entry
        // guard must not be held across an await.
        let outcome_tx = {
            use dashmap::mapref::entry::Entry;
            match self.pending.entry(key.clone()) {
                Entry::Occupied(existing) => {
                    debug!(key = %key, task = %task.id, "Coalesced onto in-flight task");
                    return Ok(WriteTicket::new(existing.get().clone(), true));
                }
                Entry::Vacant(slot) => {
                    let (outcome_tx, outcome_rx) = watch::channel(None);
                    slot.insert(outcome_rx);
                    outcome_tx
                }
            }
        };

        let rx = outcome_tx.subscribe();
        let queued = QueuedTask {
            task,
            key: key.clone(),
            outcome_tx,
        };

        if self.tx.send(queued).await.is_err() {
            // Writer is gone; release the reservation so later enqueues
            // fail cleanly instead of coalescing onto a dead task.
            self.pending.remove(&key);
            return Err(PipelineError::QueueClosed);
        }

        Ok(WriteTicket::new(rx, false))
    }

    /// Number of dedup keys currently pending.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
