//! The service facade.
//!
//! Wires the process-scoped singletons (store, pipeline writer, inference
//! gate, index shards, RAM disk) and exposes the operations collaborators
//! call. Startup order: RAM disk (optional, non-fatal) -> store ->
//! pipeline writer -> index shards -> refresh loop. Shutdown drains the
//! pipeline and tears the RAM disk down.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use semvec_embeddings::{
    get_or_download_model, CandleRuntime, InferenceGate, InferenceRuntime, ModelCache,
};
use semvec_index::{HnswParams, IndexManager};
use semvec_pipeline::{
    PipelineConfig, WriteOutcome, WritePipeline, WriteRequest, WriteTask,
};
use semvec_ramdisk::{RamDiskManager, RamDiskSnapshot, RamDiskStatus};
use semvec_search::{
    compute_measures, MeasureScores, RefinedHit, SearchHit, SimilarityMeasure, SimilaritySearch,
};
use semvec_storage::{EmbeddingStore, StoreStats};
use semvec_types::{
    bytes_hash, document_embedding_hash, text_hash, DocumentRecord, EmbeddingRecord,
    PoolingMethod, SentenceEmbedding, Settings, TranscriptRecord,
};

use crate::error::ServiceError;

/// Initialize tracing once for the process. RUST_LOG overrides the
/// configured level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Scores for one text pair, with the caller's chosen primary measure
/// broken out.
#[derive(Debug, Clone)]
pub struct SimilarityReport {
    pub measure: SimilarityMeasure,
    pub score: f64,
    pub scores: MeasureScores,
}

/// The semvec service: one embedding model, one store, one writer.
pub struct SemvecService<R: InferenceRuntime + 'static> {
    settings: Settings,
    store: Arc<EmbeddingStore>,
    pipeline: WritePipeline,
    writer: JoinHandle<()>,
    refresh_task: JoinHandle<()>,
    gate: InferenceGate,
    runtime: Arc<R>,
    index: Arc<IndexManager>,
    search: SimilaritySearch,
    ramdisk: RamDiskManager,
}

impl SemvecService<CandleRuntime> {
    /// Full production startup: download/verify model files, optionally
    /// stage them onto a RAM disk, load the Candle runtime, then wire the
    /// service.
    pub async fn start(settings: Settings) -> Result<Self, ServiceError> {
        let ramdisk = RamDiskManager::new(settings.ramdisk.clone());

        let cache = ModelCache::new(
            settings.expanded_model_dir(),
            settings.inference.model_repo.clone(),
        );
        let download_cache = cache.clone();
        let mut paths = tokio::task::spawn_blocking(move || get_or_download_model(&download_cache))
            .await
            .map_err(|e| {
                ServiceError::Embedding(semvec_embeddings::EmbeddingError::Inference(
                    e.to_string(),
                ))
            })??;

        if settings.ramdisk.enabled && ramdisk.setup().await == RamDiskStatus::Mounted {
            match ramdisk.stage_models(&cache.model_dir()).await {
                Ok(staged) => {
                    info!(dir = ?staged, "Loading model from RAM disk");
                    paths = semvec_embeddings::ModelPaths {
                        config: staged.join("config.json"),
                        tokenizer: staged.join("tokenizer.json"),
                        weights: staged.join("model.safetensors"),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Model staging failed, loading from ordinary storage");
                }
            }
        }

        let runtime = tokio::task::spawn_blocking(move || {
            CandleRuntime::load_from_paths(&paths.config, &paths.tokenizer, &paths.weights)
        })
        .await
        .map_err(|e| {
            ServiceError::Embedding(semvec_embeddings::EmbeddingError::Inference(e.to_string()))
        })??;

        Self::assemble(settings, Arc::new(runtime), ramdisk)
    }
}

impl<R: InferenceRuntime + 'static> SemvecService<R> {
    /// Wire the service around an already-loaded runtime. The RAM disk
    /// manager starts Absent; tests and embedders that need no staging use
    /// this entry point.
    pub fn with_runtime(settings: Settings, runtime: Arc<R>) -> Result<Self, ServiceError> {
        let ramdisk = RamDiskManager::new(settings.ramdisk.clone());
        Self::assemble(settings, runtime, ramdisk)
    }

    fn assemble(
        settings: Settings,
        runtime: Arc<R>,
        ramdisk: RamDiskManager,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(EmbeddingStore::open(&settings.expanded_db_path())?);

        let (pipeline, writer, mut commit_rx) =
            WritePipeline::spawn(store.clone(), PipelineConfig::default());

        let index = Arc::new(IndexManager::new(store.clone(), HnswParams::default()));

        // Build shards for every pooling of the model we serve; empty
        // pairs publish empty shards so lookups never error.
        let model_id = runtime.info().name.clone();
        for pooling in PoolingMethod::ALL {
            index.build(&model_id, *pooling)?;
        }

        // Opportunistic refresh: each committed batch marks its shard
        // dirty and rebuilds it off the async workers.
        let refresh_index = index.clone();
        let refresh_task = tokio::spawn(async move {
            while let Some(notice) = commit_rx.recv().await {
                refresh_index.mark_dirty(&notice.model_id, notice.pooling_method);
                let idx = refresh_index.clone();
                let result = tokio::task::spawn_blocking(move || {
                    idx.refresh(&notice.model_id, notice.pooling_method)
                })
                .await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Index refresh failed"),
                    Err(e) => warn!(error = %e, "Index refresh task failed"),
                }
            }
            debug!("Refresh loop stopped");
        });

        let search = SimilaritySearch::new(index.clone(), store.clone());
        let gate = InferenceGate::new(settings.inference.max_concurrent);

        info!(model = %model_id, slots = gate.limit(), "semvec service ready");
        Ok(Self {
            settings,
            store,
            pipeline,
            writer,
            refresh_task,
            gate,
            runtime,
            index,
            search,
            ramdisk,
        })
    }

    fn validate_model(&self, model_id: &str) -> Result<(), ServiceError> {
        if model_id != self.runtime.info().name {
            return Err(ServiceError::UnknownModel(model_id.to_string()));
        }
        Ok(())
    }

    /// Compute a pooled vector through the gate (no caching, no writes).
    async fn compute_vector(
        &self,
        text: &str,
        pooling: PoolingMethod,
    ) -> Result<Vec<f32>, ServiceError> {
        let runtime = self.runtime.clone();
        let text = text.to_string();
        Ok(self
            .gate
            .run(move || runtime.embed_pooled(&text, pooling))
            .await?)
    }

    /// Cache-or-compute: return the stored vector for the identity tuple,
    /// or run inference once and commit the result through the pipeline.
    ///
    /// Under concurrent same-key callers exactly one record lands and
    /// every caller observes the same vector.
    pub async fn get_or_compute_embedding(
        &self,
        text: &str,
        model_id: &str,
        pooling: PoolingMethod,
        corpus_id: &str,
    ) -> Result<Vec<f32>, ServiceError> {
        self.validate_model(model_id)?;
        let request_time = Utc::now();
        let hash = text_hash(text);

        if let Some(existing) = self.store.get(&hash, model_id, pooling, corpus_id)? {
            if !existing.stale {
                debug!(text_hash = %hash, pooling = %pooling, "Cache hit");
                return Ok(existing.vector);
            }
        }

        let vector = self.compute_vector(text, pooling).await?;
        let record = EmbeddingRecord::new(
            text,
            model_id,
            pooling,
            corpus_id,
            vector.clone(),
            request_time,
        );
        let ticket = self
            .pipeline
            .enqueue(WriteTask::new(WriteRequest::InsertEmbedding(record)))
            .await?;

        match ticket.outcome().await? {
            WriteOutcome::Inserted => Ok(vector),
            WriteOutcome::AlreadyPresent => {
                // A concurrent producer won the race; serve the stored row
                match self.store.get(&hash, model_id, pooling, corpus_id)? {
                    Some(existing) => Ok(existing.vector),
                    None => Ok(vector),
                }
            }
            WriteOutcome::Failed { key, reason } => {
                Err(ServiceError::WriteFailed { key, reason })
            }
        }
    }

    /// All statistical measures between two texts, with the chosen
    /// primary broken out. Both embeddings go through the cache.
    pub async fn similarity(
        &self,
        text_a: &str,
        text_b: &str,
        model_id: &str,
        pooling: PoolingMethod,
        measure: SimilarityMeasure,
    ) -> Result<SimilarityReport, ServiceError> {
        let a = self
            .get_or_compute_embedding(text_a, model_id, pooling, "")
            .await?;
        let b = self
            .get_or_compute_embedding(text_b, model_id, pooling, "")
            .await?;
        let scores = compute_measures(&a, &b)?;
        Ok(SimilarityReport {
            measure,
            score: measure.score_of(&scores),
            scores,
        })
    }

    /// Coarse cosine search: at most k hits, best first. Empty corpus
    /// yields empty results.
    pub async fn search(
        &self,
        query_text: &str,
        model_id: &str,
        pooling: PoolingMethod,
        k: usize,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let query = self
            .get_or_compute_embedding(query_text, model_id, pooling, "")
            .await?;
        Ok(self.search.search(model_id, pooling, &query, k)?)
    }

    /// Two-stage search with per-measure scores. `filter_pct` falls back
    /// to the configured default when None.
    pub async fn advanced_search(
        &self,
        query_text: &str,
        model_id: &str,
        pooling: PoolingMethod,
        filter_pct: Option<f64>,
        k: usize,
        measure: SimilarityMeasure,
    ) -> Result<Vec<RefinedHit>, ServiceError> {
        let query = self
            .get_or_compute_embedding(query_text, model_id, pooling, "")
            .await?;
        let pct = filter_pct.unwrap_or(self.settings.search.filter_pct);
        Ok(self
            .search
            .advanced_search(model_id, pooling, &query, pct, k, measure)?)
    }

    /// Ingest a document: embed every sentence (cache-aware, gate-bounded)
    /// and commit the document plus all sentence records in one atomic
    /// batch. Re-ingesting identical content is a cache hit for every
    /// sentence: no new records, no inference.
    ///
    /// Returns the per-sentence vectors in document order.
    pub async fn ingest_document(
        &self,
        raw_bytes: &[u8],
        filename: &str,
        mimetype: &str,
        sentences: Vec<String>,
        model_id: &str,
        pooling: PoolingMethod,
        corpus_id: &str,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.validate_model(model_id)?;
        let request_time = Utc::now();
        let document_hash = bytes_hash(raw_bytes);
        let doc_embedding_hash =
            document_embedding_hash(&document_hash, model_id, pooling.as_str());

        if let Some(existing) = self.store.get_document(&doc_embedding_hash)? {
            debug!(document = %doc_embedding_hash, "Document already ingested");
            let results = existing.results()?;
            return Ok(results.into_iter().map(|r| r.vector).collect());
        }

        // Embed all sentences; the gate bounds actual model concurrency.
        let vectors: Vec<Vec<f32>> = futures::future::try_join_all(
            sentences
                .iter()
                .map(|sentence| self.sentence_vector(sentence, model_id, pooling, corpus_id)),
        )
        .await?;

        let sentence_embeddings: Vec<EmbeddingRecord> = sentences
            .iter()
            .zip(vectors.iter())
            .map(|(sentence, vector)| {
                EmbeddingRecord::new(
                    sentence,
                    model_id,
                    pooling,
                    corpus_id,
                    vector.clone(),
                    request_time,
                )
                .with_source_document(document_hash.clone())
            })
            .collect();

        let results: Vec<SentenceEmbedding> = sentences
            .iter()
            .zip(vectors.iter())
            .map(|(sentence, vector)| SentenceEmbedding {
                sentence: sentence.clone(),
                vector: vector.clone(),
                embedding_hash: semvec_types::vector_hash(vector),
            })
            .collect();

        let mut document = DocumentRecord {
            document_hash,
            filename: filename.to_string(),
            mimetype: mimetype.to_string(),
            corpus_id: corpus_id.to_string(),
            size_bytes: raw_bytes.len() as u64,
            sentences,
            compressed_results: Vec::new(),
            document_embedding_hash: doc_embedding_hash,
            model_id: model_id.to_string(),
            pooling_method: pooling,
            request_time,
            response_time: Utc::now(),
        };
        document.set_results(&results)?;

        let ticket = self
            .pipeline
            .enqueue(WriteTask::new(WriteRequest::InsertDocument {
                document,
                sentence_embeddings,
            }))
            .await?;

        match ticket.outcome().await? {
            WriteOutcome::Inserted | WriteOutcome::AlreadyPresent => Ok(vectors),
            WriteOutcome::Failed { key, reason } => {
                Err(ServiceError::WriteFailed { key, reason })
            }
        }
    }

    /// One sentence's vector: stored row if live, fresh compute otherwise.
    /// No write; document ingestion commits sentences atomically.
    async fn sentence_vector(
        &self,
        sentence: &str,
        model_id: &str,
        pooling: PoolingMethod,
        corpus_id: &str,
    ) -> Result<Vec<f32>, ServiceError> {
        let hash = text_hash(sentence);
        if let Some(existing) = self.store.get(&hash, model_id, pooling, corpus_id)? {
            if !existing.stale {
                return Ok(existing.vector);
            }
        }
        self.compute_vector(sentence, pooling).await
    }

    /// Store a transcript produced by the transcription collaborator.
    pub async fn ingest_transcript(
        &self,
        transcript: TranscriptRecord,
    ) -> Result<WriteOutcome, ServiceError> {
        let ticket = self
            .pipeline
            .enqueue(WriteTask::new(WriteRequest::InsertTranscript(transcript)))
            .await?;
        match ticket.outcome().await? {
            WriteOutcome::Failed { key, reason } => {
                Err(ServiceError::WriteFailed { key, reason })
            }
            outcome => Ok(outcome),
        }
    }

    /// Explicit freshness for callers that cannot tolerate a stale shard.
    pub async fn refresh_index(
        &self,
        model_id: &str,
        pooling: PoolingMethod,
    ) -> Result<bool, ServiceError> {
        self.validate_model(model_id)?;
        let index = self.index.clone();
        let model = model_id.to_string();
        tokio::task::spawn_blocking(move || index.refresh(&model, pooling))
            .await
            .map_err(|e| {
                ServiceError::Embedding(semvec_embeddings::EmbeddingError::Inference(
                    e.to_string(),
                ))
            })?
            .map_err(ServiceError::from)
    }

    /// RAM disk snapshot.
    pub async fn ramdisk_status(&self) -> RamDiskSnapshot {
        self.ramdisk.status().await
    }

    /// Tear the RAM disk down now. Model loading falls back to ordinary
    /// storage afterwards.
    pub async fn clear_ramdisk(&self) -> Result<RamDiskStatus, ServiceError> {
        Ok(self.ramdisk.teardown().await?)
    }

    /// Delete embeddings older than the given age.
    pub fn purge_expired(&self, max_age: chrono::Duration) -> Result<usize, ServiceError> {
        Ok(self.store.purge_expired(max_age)?)
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats, ServiceError> {
        Ok(self.store.stats()?)
    }

    /// Drain the pipeline, stop the refresh loop, tear down the RAM disk,
    /// and flush storage.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        info!("Shutting down semvec service");
        let SemvecService {
            pipeline,
            writer,
            refresh_task,
            ramdisk,
            store,
            ..
        } = self;

        drop(pipeline);
        if writer.await.is_err() {
            warn!("Writer task ended abnormally");
        }
        if refresh_task.await.is_err() {
            warn!("Refresh task ended abnormally");
        }
        if let Err(e) = ramdisk.teardown().await {
            warn!(error = %e, "RAM disk teardown failed");
        }
        store.flush()?;
        info!("Shutdown complete");
        Ok(())
    }
}
