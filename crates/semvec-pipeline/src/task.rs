//! Write tasks, dedup keys, and completion tickets.

use semvec_types::{DocumentRecord, EmbeddingRecord, TranscriptRecord};
use tokio::sync::watch;
use ulid::Ulid;

use crate::error::PipelineError;

/// Identity tuple rendered canonically; concurrent requests for the same
/// unit of work coalesce on it.
pub type DedupKey = String;

/// The mutation a producer wants committed.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    InsertEmbedding(EmbeddingRecord),
    /// Document plus its per-sentence embeddings; commits atomically.
    InsertDocument {
        document: DocumentRecord,
        sentence_embeddings: Vec<EmbeddingRecord>,
    },
    InsertTranscript(TranscriptRecord),
}

/// A queued mutation with a stable id for log correlation.
#[derive(Debug, Clone)]
pub struct WriteTask {
    pub id: Ulid,
    pub request: WriteRequest,
}

impl WriteTask {
    pub fn new(request: WriteRequest) -> Self {
        Self {
            id: Ulid::new(),
            request,
        }
    }

    /// Canonical dedup key for this task's target row(s).
    pub fn dedup_key(&self) -> DedupKey {
        match &self.request {
            WriteRequest::InsertEmbedding(r) => format!(
                "emb:{}:{}:{}:{}",
                r.model_id, r.pooling_method, r.corpus_id, r.text_hash
            ),
            WriteRequest::InsertDocument { document, .. } => {
                format!("doc:{}", document.document_embedding_hash)
            }
            WriteRequest::InsertTranscript(r) => format!("transcript:{}", r.audio_hash),
        }
    }
}

/// Terminal outcome of a write task, delivered to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    AlreadyPresent,
    /// Retries exhausted or a fatal storage error. Reported once, with the
    /// dedup key, so the caller can decide whether to resubmit.
    Failed { key: DedupKey, reason: String },
}

/// Handle a producer holds while its task (or the in-flight task it was
/// coalesced onto) moves through the queue.
#[derive(Debug)]
pub struct WriteTicket {
    deduped: bool,
    rx: watch::Receiver<Option<WriteOutcome>>,
}

impl WriteTicket {
    pub(crate) fn new(rx: watch::Receiver<Option<WriteOutcome>>, deduped: bool) -> Self {
        Self { deduped, rx }
    }

    /// True when this ticket rides an already-pending task.
    pub fn was_deduped(&self) -> bool {
        self.deduped
    }

    /// Wait for the terminal outcome. Dropping this future (or the whole
    /// ticket) abandons the wait without touching the pending set; the
    /// writer owns entry removal.
    pub async fn outcome(mut self) -> Result<WriteOutcome, PipelineError> {
        let value = self
            .rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| PipelineError::OutcomeChannelClosed)?;
        Ok(value.clone().unwrap_or(WriteOutcome::Failed {
            key: String::new(),
            reason: "missing outcome".to_string(),
        }))
    }
}
