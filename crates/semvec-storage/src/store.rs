//! RocksDB-backed embedding store.
//!
//! Provides:
//! - Content-addressed get/put with cache-hit (not overwrite) semantics
//! - Atomic multi-op batches, the write pipeline's commit entry point
//! - Ordered per-(model, pooling) scans for index construction
//! - Crash safety via the write-ahead log, consolidation via compaction
//!
//! Reads go straight to RocksDB and never wait on writers touching
//! unrelated keys.

use std::path::Path;

use chrono::{Duration, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use semvec_types::{DocumentRecord, EmbeddingRecord, PoolingMethod, TranscriptRecord};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_DOCUMENTS, CF_EMBEDDINGS, CF_TRANSCRIPTS,
};
use crate::error::StorageError;
use crate::keys::EmbeddingKey;

/// Outcome of a put: a colliding write against a live row is a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    Inserted,
    AlreadyPresent,
}

/// One mutation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum StorageOp {
    PutEmbedding(EmbeddingRecord),
    /// A document and its per-sentence embeddings commit together or not
    /// at all.
    PutDocument {
        document: DocumentRecord,
        sentence_embeddings: Vec<EmbeddingRecord>,
    },
    PutTranscript(TranscriptRecord),
}

/// Main storage interface for semvec.
pub struct EmbeddingStore {
    db: DB,
}

impl EmbeddingStore {
    /// Open storage at the given path, creating if necessary.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening embedding store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Universal compaction for an append-mostly workload
        db_opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Look up one embedding by its identity tuple.
    pub fn get(
        &self,
        text_hash: &str,
        model_id: &str,
        pooling_method: PoolingMethod,
        corpus_id: &str,
    ) -> Result<Option<EmbeddingRecord>, StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let key = EmbeddingKey::new(model_id, pooling_method, corpus_id, text_hash)?;
        match self.db.get_cf(&cf, key.to_bytes())? {
            Some(bytes) => {
                let record = EmbeddingRecord::from_bytes(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Store one embedding. Safe under concurrent same-key callers when
    /// invoked through the write pipeline's single writer: exactly one
    /// physical row results and later attempts resolve to AlreadyPresent.
    pub fn put(&self, record: &EmbeddingRecord) -> Result<PutStatus, StorageError> {
        let statuses = self.apply(&[StorageOp::PutEmbedding(record.clone())])?;
        Ok(statuses[0])
    }

    /// Apply a batch of mutations atomically (one RocksDB WriteBatch).
    ///
    /// Returns a per-op status aligned with the input. A batch failure
    /// applies nothing; the WAL guarantees a crash mid-commit leaves either
    /// the old state or the full batch.
    pub fn apply(&self, ops: &[StorageOp]) -> Result<Vec<PutStatus>, StorageError> {
        let embeddings_cf = self.cf(CF_EMBEDDINGS)?;
        let documents_cf = self.cf(CF_DOCUMENTS)?;
        let transcripts_cf = self.cf(CF_TRANSCRIPTS)?;

        let mut batch = WriteBatch::default();
        let mut statuses = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                StorageOp::PutEmbedding(record) => {
                    let status =
                        self.stage_embedding(&mut batch, embeddings_cf, record)?;
                    statuses.push(status);
                }
                StorageOp::PutDocument {
                    document,
                    sentence_embeddings,
                } => {
                    let doc_key = document.document_embedding_hash.as_bytes();
                    if self.db.get_cf(&documents_cf, doc_key)?.is_some() {
                        debug!(
                            document = %document.document_embedding_hash,
                            "Document already present, skipping"
                        );
                        statuses.push(PutStatus::AlreadyPresent);
                        continue;
                    }
                    let doc_bytes = document
                        .to_bytes()
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    batch.put_cf(&documents_cf, doc_key, doc_bytes);
                    for record in sentence_embeddings {
                        self.stage_embedding(&mut batch, embeddings_cf, record)?;
                    }
                    statuses.push(PutStatus::Inserted);
                }
                StorageOp::PutTranscript(record) => {
                    let key = record.audio_hash.as_bytes();
                    if self.db.get_cf(&transcripts_cf, key)?.is_some() {
                        debug!(audio = %record.audio_hash, "Transcript already present, skipping");
                        statuses.push(PutStatus::AlreadyPresent);
                        continue;
                    }
                    let bytes = record
                        .to_bytes()
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    batch.put_cf(&transcripts_cf, key, bytes);
                    statuses.push(PutStatus::Inserted);
                }
            }
        }

        if !batch.is_empty() {
            self.db.write(batch)?;
        }
        Ok(statuses)
    }

    /// Stage one embedding into the batch unless a live row already holds
    /// its key. Stale rows are replaced.
    fn stage_embedding(
        &self,
        batch: &mut WriteBatch,
        cf: &rocksdb::ColumnFamily,
        record: &EmbeddingRecord,
    ) -> Result<PutStatus, StorageError> {
        let key = EmbeddingKey::new(
            record.model_id.as_str(),
            record.pooling_method,
            record.corpus_id.as_str(),
            record.text_hash.as_str(),
        )?;
        if let Some(bytes) = self.db.get_cf(&cf, key.to_bytes())? {
            let existing = EmbeddingRecord::from_bytes(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            if !existing.stale {
                debug!(
                    text_hash = %record.text_hash,
                    model = %record.model_id,
                    pooling = %record.pooling_method,
                    "Embedding already present, skipping"
                );
                return Ok(PutStatus::AlreadyPresent);
            }
        }
        let bytes = record
            .to_bytes()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        batch.put_cf(&cf, key.to_bytes(), bytes);
        Ok(PutStatus::Inserted)
    }

    /// Scan all committed embeddings for one (model, pooling) pair in
    /// stable key order (text hash, then corpus). The index builder depends
    /// on this order being deterministic across restarts.
    pub fn scan_embeddings(
        &self,
        model_id: &str,
        pooling_method: PoolingMethod,
    ) -> Result<Vec<EmbeddingRecord>, StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let prefix = EmbeddingKey::shard_prefix(model_id, pooling_method);

        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record = EmbeddingRecord::from_bytes(&value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Find a text's embedding under any corpus. The vector is a pure
    /// function of (text, model, pooling), so corpus duplicates carry the
    /// same vector and the first match suffices; the refinement stage
    /// uses this to resolve coarse candidates.
    pub fn find_embedding(
        &self,
        model_id: &str,
        pooling_method: PoolingMethod,
        text_hash: &str,
    ) -> Result<Option<EmbeddingRecord>, StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let prefix = EmbeddingKey::text_prefix(model_id, pooling_method, text_hash);

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        if let Some(item) = iter.next() {
            let (key, value) = item?;
            if key.starts_with(&prefix) {
                let record = EmbeddingRecord::from_bytes(&value)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Get a document by its derived (document, model, pooling) digest.
    pub fn get_document(
        &self,
        document_embedding_hash: &str,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, document_embedding_hash.as_bytes())? {
            Some(bytes) => {
                let record = DocumentRecord::from_bytes(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get a transcript by audio hash.
    pub fn get_transcript(
        &self,
        audio_hash: &str,
    ) -> Result<Option<TranscriptRecord>, StorageError> {
        let cf = self.cf(CF_TRANSCRIPTS)?;
        match self.db.get_cf(&cf, audio_hash.as_bytes())? {
            Some(bytes) => {
                let record = TranscriptRecord::from_bytes(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete embeddings whose response_time is older than the given age.
    /// Returns the number of rows removed.
    pub fn purge_expired(&self, max_age: Duration) -> Result<usize, StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let cutoff = Utc::now() - max_age;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            let record = EmbeddingRecord::from_bytes(&value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            if record.response_time < cutoff {
                batch.delete_cf(&cf, &key);
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
            info!(count = count, "Purged expired embeddings");
        }
        Ok(count)
    }

    /// Flush all column families to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Trigger manual compaction on all column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.compact_range_cf::<&[u8], &[u8]>(&cf, None, None);
            }
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let mut stats = StoreStats::default();

        if let Some(cf) = self.db.cf_handle(CF_EMBEDDINGS) {
            stats.embedding_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_DOCUMENTS) {
            stats.document_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_TRANSCRIPTS) {
            stats.transcript_count = self.count_cf_entries(cf)?;
        }
        stats.disk_usage_bytes = self.disk_usage()?;

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn disk_usage(&self) -> Result<u64, StorageError> {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        Ok(total_size)
    }
}

/// Statistics about the store.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub embedding_count: u64,
    pub document_count: u64,
    pub transcript_count: u64,
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use semvec_types::{document_embedding_hash, text_hash, vector_hash, SentenceEmbedding};
    use tempfile::TempDir;

    fn create_test_store() -> (EmbeddingStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EmbeddingStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn sample_record(text: &str, corpus: &str) -> EmbeddingRecord {
        EmbeddingRecord::new(
            text,
            "m1",
            PoolingMethod::Mean,
            corpus,
            vec![0.1, 0.2, 0.3],
            Utc::now(),
        )
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_test_store();
        for cf_name in ALL_CF_NAMES {
            assert!(
                store.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_test_store();
        let record = sample_record("hello world", "");

        let status = store.put(&record).unwrap();
        assert_eq!(status, PutStatus::Inserted);

        let found = store
            .get(&record.text_hash, "m1", PoolingMethod::Mean, "")
            .unwrap()
            .unwrap();
        assert_eq!(found.vector, record.vector);
        assert!(found.verify_integrity());
    }

    #[test]
    fn test_get_miss_is_none_not_error() {
        let (store, _temp) = create_test_store();
        let found = store
            .get(&text_hash("absent"), "m1", PoolingMethod::Mean, "")
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_duplicate_put_is_cache_hit() {
        let (store, _temp) = create_test_store();
        let record = sample_record("hello world", "");

        assert_eq!(store.put(&record).unwrap(), PutStatus::Inserted);

        // Second write with a different vector must not overwrite
        let mut second = sample_record("hello world", "");
        second.vector = vec![9.0, 9.0, 9.0];
        second.embedding_hash = vector_hash(&second.vector);
        assert_eq!(store.put(&second).unwrap(), PutStatus::AlreadyPresent);

        let found = store
            .get(&record.text_hash, "m1", PoolingMethod::Mean, "")
            .unwrap()
            .unwrap();
        assert_eq!(found.vector, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_stale_row_is_replaced() {
        let (store, _temp) = create_test_store();
        let mut record = sample_record("hello world", "");
        record.stale = true;
        store.put(&record).unwrap();

        let mut fresh = sample_record("hello world", "");
        fresh.vector = vec![0.4, 0.5, 0.6];
        fresh.embedding_hash = vector_hash(&fresh.vector);
        assert_eq!(store.put(&fresh).unwrap(), PutStatus::Inserted);

        let found = store
            .get(&record.text_hash, "m1", PoolingMethod::Mean, "")
            .unwrap()
            .unwrap();
        assert_eq!(found.vector, vec![0.4, 0.5, 0.6]);
        assert!(!found.stale);
    }

    #[test]
    fn test_corpus_id_is_part_of_identity() {
        let (store, _temp) = create_test_store();
        store.put(&sample_record("hello", "corpus-a")).unwrap();

        assert_eq!(
            store.put(&sample_record("hello", "corpus-b")).unwrap(),
            PutStatus::Inserted
        );
        assert!(store
            .get(&text_hash("hello"), "m1", PoolingMethod::Mean, "corpus-a")
            .unwrap()
            .is_some());
        assert!(store
            .get(&text_hash("hello"), "m1", PoolingMethod::Mean, "corpus-b")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_scan_order_is_deterministic() {
        let (store, _temp) = create_test_store();
        for text in ["banana", "apple", "cherry"] {
            store.put(&sample_record(text, "")).unwrap();
        }
        // A different pooling method must not show up in the scan
        store
            .put(&EmbeddingRecord::new(
                "apple",
                "m1",
                PoolingMethod::Svd,
                "",
                vec![1.0, 2.0],
                Utc::now(),
            ))
            .unwrap();

        let first = store.scan_embeddings("m1", PoolingMethod::Mean).unwrap();
        let second = store.scan_embeddings("m1", PoolingMethod::Mean).unwrap();
        assert_eq!(first.len(), 3);
        let order: Vec<&str> = first.iter().map(|r| r.text_hash.as_str()).collect();
        let order2: Vec<&str> = second.iter().map(|r| r.text_hash.as_str()).collect();
        assert_eq!(order, order2);

        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted, "scan must follow key order");
    }

    #[test]
    fn test_document_batch_is_atomic_and_idempotent() {
        let (store, _temp) = create_test_store();

        let raw = b"doc bytes";
        let doc_hash = semvec_types::bytes_hash(raw);
        let deh = document_embedding_hash(&doc_hash, "m1", "mean");
        let sentences = vec!["First.".to_string(), "Second.".to_string()];
        let mut document = DocumentRecord {
            document_hash: doc_hash.clone(),
            filename: "notes.txt".to_string(),
            mimetype: "text/plain".to_string(),
            corpus_id: String::new(),
            size_bytes: raw.len() as u64,
            sentences: sentences.clone(),
            compressed_results: Vec::new(),
            document_embedding_hash: deh.clone(),
            model_id: "m1".to_string(),
            pooling_method: PoolingMethod::Mean,
            request_time: Utc::now(),
            response_time: Utc::now(),
        };
        let sentence_embeddings: Vec<EmbeddingRecord> = sentences
            .iter()
            .map(|s| {
                EmbeddingRecord::new(s, "m1", PoolingMethod::Mean, "", vec![0.5], Utc::now())
                    .with_source_document(doc_hash.clone())
            })
            .collect();
        let results: Vec<SentenceEmbedding> = sentences
            .iter()
            .map(|s| SentenceEmbedding {
                sentence: s.clone(),
                vector: vec![0.5],
                embedding_hash: vector_hash(&[0.5]),
            })
            .collect();
        document.set_results(&results).unwrap();

        let statuses = store
            .apply(&[StorageOp::PutDocument {
                document: document.clone(),
                sentence_embeddings: sentence_embeddings.clone(),
            }])
            .unwrap();
        assert_eq!(statuses, vec![PutStatus::Inserted]);
        assert!(store.get_document(&deh).unwrap().is_some());

        // Re-apply: cache hit, nothing changes
        let statuses = store
            .apply(&[StorageOp::PutDocument {
                document,
                sentence_embeddings,
            }])
            .unwrap();
        assert_eq!(statuses, vec![PutStatus::AlreadyPresent]);
    }

    #[test]
    fn test_transcript_roundtrip() {
        let (store, _temp) = create_test_store();
        let record = TranscriptRecord {
            audio_hash: semvec_types::bytes_hash(b"audio"),
            filename: "call.wav".to_string(),
            size_mb: 2.0,
            segments: vec!["one".to_string()],
            combined_text: "one".to_string(),
            metadata: serde_json::Value::Null,
            corpus_id: String::new(),
            request_time: Utc::now(),
            response_time: Utc::now(),
        };
        let statuses = store
            .apply(&[StorageOp::PutTranscript(record.clone())])
            .unwrap();
        assert_eq!(statuses, vec![PutStatus::Inserted]);
        assert!(store.get_transcript(&record.audio_hash).unwrap().is_some());
    }

    #[test]
    fn test_purge_expired() {
        let (store, _temp) = create_test_store();
        let mut old = sample_record("old text", "");
        old.response_time = Utc::now() - Duration::hours(48);
        store.put(&old).unwrap();
        store.put(&sample_record("fresh text", "")).unwrap();

        let purged = store.purge_expired(Duration::hours(24)).unwrap();
        assert_eq!(purged, 1);
        assert!(store
            .get(&text_hash("old text"), "m1", PoolingMethod::Mean, "")
            .unwrap()
            .is_none());
        assert!(store
            .get(&text_hash("fresh text"), "m1", PoolingMethod::Mean, "")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_find_embedding_across_corpora() {
        let (store, _temp) = create_test_store();
        store.put(&sample_record("shared text", "corpus-b")).unwrap();

        let found = store
            .find_embedding("m1", PoolingMethod::Mean, &text_hash("shared text"))
            .unwrap()
            .unwrap();
        assert_eq!(found.corpus_id, "corpus-b");

        assert!(store
            .find_embedding("m1", PoolingMethod::Mean, &text_hash("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_uniqueness_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let record = sample_record("persistent", "");
        {
            let store = EmbeddingStore::open(temp_dir.path()).unwrap();
            assert_eq!(store.put(&record).unwrap(), PutStatus::Inserted);
            store.flush().unwrap();
        }
        let store = EmbeddingStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.put(&record).unwrap(), PutStatus::AlreadyPresent);
        assert_eq!(store.stats().unwrap().embedding_count, 1);
    }
}
