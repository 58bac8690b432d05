//! The dedicated writer: single consumer, batching, retry.
//!
//! All storage mutations funnel through one task so the file-backed store
//! never sees concurrent writers. Independent tasks queued within a short
//! window commit as one atomic batch to amortize fixed commit cost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

use semvec_storage::{EmbeddingStore, PutStatus, StorageError, StorageOp};
use semvec_types::PoolingMethod;

use crate::retry::RetryPolicy;
use crate::task::{DedupKey, WriteOutcome, WriteRequest, WriteTask};

/// Storage seam the writer commits through. `EmbeddingStore` is the real
/// backend; tests inject fakes that fail N times then succeed.
pub trait WriteBackend: Send + Sync + 'static {
    fn apply(&self, ops: &[StorageOp]) -> Result<Vec<PutStatus>, StorageError>;
}

impl WriteBackend for EmbeddingStore {
    fn apply(&self, ops: &[StorageOp]) -> Result<Vec<PutStatus>, StorageError> {
        EmbeddingStore::apply(self, ops)
    }
}

/// Emitted after a batch commits, so the index manager can refresh the
/// affected shards lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitNotice {
    pub model_id: String,
    pub pooling_method: PoolingMethod,
}

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Queue capacity; producers wait when it fills (backpressure)
    pub queue_depth: usize,
    /// Largest batch committed in one storage transaction
    pub batch_max_tasks: usize,
    /// How long the writer waits to top up a batch
    pub batch_window_ms: u64,
    /// Retry policy for transient storage contention
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1_000,
            batch_max_tasks: 32,
            batch_window_ms: 20,
            retry: RetryPolicy::default(),
        }
    }
}

/// A task in flight, paired with its outcome channel.
pub(crate) struct QueuedTask {
    pub task: WriteTask,
    pub key: DedupKey,
    pub outcome_tx: watch::Sender<Option<WriteOutcome>>,
}

/// Drain the queue until every sender is gone.
pub(crate) async fn run_writer<B: WriteBackend>(
    backend: Arc<B>,
    mut rx: mpsc::Receiver<QueuedTask>,
    pending: Arc<DashMap<DedupKey, watch::Receiver<Option<WriteOutcome>>>>,
    config: PipelineConfig,
    commit_tx: mpsc::UnboundedSender<CommitNotice>,
) {
    info!(
        batch_max = config.batch_max_tasks,
        window_ms = config.batch_window_ms,
        "Write pipeline started"
    );

    let window = Duration::from_millis(config.batch_window_ms);

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::Instant::from_std(Instant::now() + window);

        while batch.len() < config.batch_max_tasks {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(next)) => batch.push(next),
                // Queue closed: commit what we have, then exit the outer loop
                Ok(None) => break,
                // Window elapsed
                Err(_) => break,
            }
        }

        commit_batch(&*backend, batch, &pending, &config.retry, &commit_tx).await;
    }

    info!("Write pipeline stopped");
}

/// Commit one batch with retry, then resolve every waiter.
async fn commit_batch<B: WriteBackend>(
    backend: &B,
    batch: Vec<QueuedTask>,
    pending: &DashMap<DedupKey, watch::Receiver<Option<WriteOutcome>>>,
    retry: &RetryPolicy,
    commit_tx: &mpsc::UnboundedSender<CommitNotice>,
) {
    let ops: Vec<StorageOp> = batch.iter().map(|q| to_storage_op(&q.task)).collect();

    let mut backoff = retry.to_backoff();
    let mut attempts = 0u32;

    let result = loop {
        attempts += 1;
        match backend.apply(&ops) {
            Ok(statuses) => break Ok(statuses),
            Err(e) if e.is_transient() => {
                if attempts >= retry.max_attempts {
                    error!(attempts = attempts, error = %e, "Retries exhausted");
                    break Err(e);
                }
                match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            attempt = attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Storage busy, retrying batch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(attempts = attempts, error = %e, "Backoff exhausted");
                        break Err(e);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Batch commit failed");
                break Err(e);
            }
        }
    };

    match result {
        Ok(statuses) => {
            debug!(tasks = batch.len(), attempts = attempts, "Batch committed");
            let mut notices = Vec::new();
            for (queued, status) in batch.into_iter().zip(statuses) {
                if status == PutStatus::Inserted {
                    if let Some(notice) = commit_notice_for(&queued.task) {
                        if !notices.contains(&notice) {
                            notices.push(notice);
                        }
                    }
                }
                let outcome = match status {
                    PutStatus::Inserted => WriteOutcome::Inserted,
                    PutStatus::AlreadyPresent => WriteOutcome::AlreadyPresent,
                };
                resolve(pending, queued, outcome);
            }
            for notice in notices {
                // Receiver may be gone during shutdown; nothing to do then
                let _ = commit_tx.send(notice);
            }
        }
        Err(e) => {
            let reason = e.to_string();
            for queued in batch {
                let outcome = WriteOutcome::Failed {
                    key: queued.key.clone(),
                    reason: reason.clone(),
                };
                warn!(key = %queued.key, task = %queued.task.id, "Write failed");
                resolve(pending, queued, outcome);
            }
        }
    }
}

/// Remove the pending entry, then publish the outcome. The writer owns the
/// pending set; abandoning callers never touch it.
fn resolve(
    pending: &DashMap<DedupKey, watch::Receiver<Option<WriteOutcome>>>,
    queued: QueuedTask,
    outcome: WriteOutcome,
) {
    pending.remove(&queued.key);
    // All receivers may have been dropped; the outcome is still terminal
    let _ = queued.outcome_tx.send(Some(outcome));
}

fn to_storage_op(task: &WriteTask) -> StorageOp {
    match &task.request {
        WriteRequest::InsertEmbedding(record) => StorageOp::PutEmbedding(record.clone()),
        WriteRequest::InsertDocument {
            document,
            sentence_embeddings,
        } => StorageOp::PutDocument {
            document: document.clone(),
            sentence_embeddings: sentence_embeddings.clone(),
        },
        WriteRequest::InsertTranscript(record) => StorageOp::PutTranscript(record.clone()),
    }
}

fn commit_notice_for(task: &WriteTask) -> Option<CommitNotice> {
    match &task.request {
        WriteRequest::InsertEmbedding(record) => Some(CommitNotice {
            model_id: record.model_id.clone(),
            pooling_method: record.pooling_method,
        }),
        WriteRequest::InsertDocument { document, .. } => Some(CommitNotice {
            model_id: document.model_id.clone(),
            pooling_method: document.pooling_method,
        }),
        WriteRequest::InsertTranscript(_) => None,
    }
}
