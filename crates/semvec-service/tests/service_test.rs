//! End-to-end tests over the service facade with a counting mock runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use semvec_embeddings::{EmbeddingError, InferenceRuntime, ModelInfo};
use semvec_service::{
    PoolingMethod, SemvecService, Settings, SimilarityMeasure, TranscriptRecord, WriteOutcome,
};
use semvec_types::{bytes_hash, text_hash};

const MODEL: &str = "mock-model";

/// Deterministic runtime that counts inference calls, so tests can prove
/// the cache absorbed repeated requests.
struct MockRuntime {
    info: ModelInfo,
    calls: AtomicUsize,
}

impl MockRuntime {
    fn new() -> Self {
        Self {
            info: ModelInfo {
                name: MODEL.to_string(),
                dimension: 4,
                max_sequence_length: 64,
            },
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceRuntime for MockRuntime {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed_tokens(&self, text: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<Vec<f32>> = text
            .split_whitespace()
            .map(|word| {
                let mut seed = 17u32;
                for b in word.bytes() {
                    seed = seed.wrapping_mul(31).wrapping_add(u32::from(b));
                }
                (0..4)
                    .map(|i| ((seed >> (i * 5)) & 0x1F) as f32 / 31.0 + 0.01)
                    .collect()
            })
            .collect();
        if rows.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        Ok(rows)
    }
}

fn test_settings(temp: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.db_path = temp.path().join("db").to_string_lossy().to_string();
    settings.inference.max_concurrent = 2;
    settings.ramdisk.enabled = false;
    settings
}

fn start_service(temp: &TempDir) -> (SemvecService<MockRuntime>, Arc<MockRuntime>) {
    let runtime = Arc::new(MockRuntime::new());
    let service = SemvecService::with_runtime(test_settings(temp), runtime.clone()).unwrap();
    (service, runtime)
}

#[tokio::test(flavor = "multi_thread")]
async fn second_identical_request_skips_inference() {
    let temp = TempDir::new().unwrap();
    let (service, runtime) = start_service(&temp);

    let first = service
        .get_or_compute_embedding("The quick brown fox", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();
    assert_eq!(runtime.calls(), 1);

    let second = service
        .get_or_compute_embedding("The quick brown fox", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();
    assert_eq!(runtime.calls(), 1, "cache hit must not re-run inference");
    assert_eq!(first, second, "cached vector must be bit-identical");

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_requests_store_one_record() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .get_or_compute_embedding("shared text", MODEL, PoolingMethod::Mean, "")
                .await
                .unwrap()
        }));
    }

    let mut vectors = Vec::new();
    for handle in handles {
        vectors.push(handle.await.unwrap());
    }
    for vector in &vectors {
        assert_eq!(vector, &vectors[0], "all callers observe the same vector");
    }

    let stats = service.stats().unwrap();
    assert_eq!(stats.embedding_count, 1, "exactly one stored record");

    Arc::try_unwrap(service)
        .map_err(|_| ())
        .unwrap()
        .shutdown()
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn different_pooling_is_a_different_cache_entry() {
    let temp = TempDir::new().unwrap();
    let (service, runtime) = start_service(&temp);

    let mean = service
        .get_or_compute_embedding("pooling test", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();
    let mm = service
        .get_or_compute_embedding("pooling test", MODEL, PoolingMethod::MinsMaxes, "")
        .await
        .unwrap();

    assert_eq!(runtime.calls(), 2);
    assert_eq!(mean.len(), 4);
    assert_eq!(mm.len(), 8);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    let result = service
        .get_or_compute_embedding("text", "other-model", PoolingMethod::Mean, "")
        .await;
    assert!(result.is_err());

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn search_finds_committed_text_after_refresh() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    for text in ["alpha beta gamma", "delta epsilon", "zeta eta theta"] {
        service
            .get_or_compute_embedding(text, MODEL, PoolingMethod::Mean, "")
            .await
            .unwrap();
    }
    service
        .refresh_index(MODEL, PoolingMethod::Mean)
        .await
        .unwrap();

    let hits = service
        .search("alpha beta gamma", MODEL, PoolingMethod::Mean, 2)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 2);
    assert_eq!(hits[0].text_hash, text_hash("alpha beta gamma"));
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn advanced_search_returns_per_measure_scores() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    for text in [
        "alpha beta gamma",
        "delta epsilon",
        "zeta eta theta",
        "iota kappa",
    ] {
        service
            .get_or_compute_embedding(text, MODEL, PoolingMethod::Mean, "")
            .await
            .unwrap();
    }
    service
        .refresh_index(MODEL, PoolingMethod::Mean)
        .await
        .unwrap();

    let hits = service
        .advanced_search(
            "alpha beta gamma",
            MODEL,
            PoolingMethod::Mean,
            Some(1.0),
            3,
            SimilarityMeasure::Aggregate,
        )
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(hits.len() <= 3);
    // The identical text refines to the top with perfect rank agreement
    assert_eq!(hits[0].text_hash, text_hash("alpha beta gamma"));
    assert!((hits[0].scores.spearman_rho - 1.0).abs() < 1e-9);
    for pair in hits.windows(2) {
        assert!(pair[0].scores.aggregate >= pair[1].scores.aggregate);
    }

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn search_on_fresh_store_is_not_an_error() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    // The only thing the shard could possibly contain is the query itself
    // (queries are cached like any other text).
    let hits = service
        .search("anything at all", MODEL, PoolingMethod::Mean, 5)
        .await
        .unwrap();
    assert!(hits.len() <= 1);
    for hit in &hits {
        assert_eq!(hit.text_hash, text_hash("anything at all"));
    }

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn similarity_of_identical_texts_is_perfect() {
    let temp = TempDir::new().unwrap();
    let (service, runtime) = start_service(&temp);

    let report = service
        .similarity(
            "same words here",
            "same words here",
            MODEL,
            PoolingMethod::Mean,
            SimilarityMeasure::SpearmanRho,
        )
        .await
        .unwrap();
    assert!((report.score - 1.0).abs() < 1e-9);
    assert!((report.scores.jensen_shannon_dependency - 1.0).abs() < 1e-9);
    // Identical text = one cache entry = one inference call
    assert_eq!(runtime.calls(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn document_reingest_is_a_full_cache_hit() {
    let temp = TempDir::new().unwrap();
    let (service, runtime) = start_service(&temp);

    let raw = b"report body";
    let sentences = vec![
        "First sentence.".to_string(),
        "Second sentence.".to_string(),
        "Third sentence.".to_string(),
    ];

    let vectors = service
        .ingest_document(
            raw,
            "report.txt",
            "text/plain",
            sentences.clone(),
            MODEL,
            PoolingMethod::Mean,
            "docs",
        )
        .await
        .unwrap();
    assert_eq!(vectors.len(), 3);
    let calls_after_first = runtime.calls();
    assert_eq!(calls_after_first, 3);

    // Identical content, same (model, pooling): every sentence is a hit
    let again = service
        .ingest_document(
            raw,
            "report.txt",
            "text/plain",
            sentences,
            MODEL,
            PoolingMethod::Mean,
            "docs",
        )
        .await
        .unwrap();
    assert_eq!(runtime.calls(), calls_after_first, "no second inference");
    assert_eq!(again, vectors, "same vectors back");

    let stats = service.stats().unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.embedding_count, 3);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transcript_ingest_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    let transcript = TranscriptRecord {
        audio_hash: bytes_hash(b"audio bytes"),
        filename: "call.wav".to_string(),
        size_mb: 1.2,
        segments: vec!["hello".to_string(), "goodbye".to_string()],
        combined_text: "hello goodbye".to_string(),
        metadata: serde_json::json!({"language": "en"}),
        corpus_id: String::new(),
        request_time: Utc::now(),
        response_time: Utc::now(),
    };

    let first = service.ingest_transcript(transcript.clone()).await.unwrap();
    assert_eq!(first, WriteOutcome::Inserted);

    let second = service.ingest_transcript(transcript).await.unwrap();
    assert_eq!(second, WriteOutcome::AlreadyPresent);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn ramdisk_disabled_reports_absent_and_clear_is_safe() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    let snapshot = service.ramdisk_status().await;
    assert!(!snapshot.mounted);

    // Clearing an unmounted volume is a no-op transition, not an error
    service.clear_ramdisk().await.unwrap();
    assert!(!service.ramdisk_status().await.mounted);

    // The system keeps serving embeddings on ordinary storage
    service
        .get_or_compute_embedding("still works", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn purge_expired_removes_nothing_fresh() {
    let temp = TempDir::new().unwrap();
    let (service, _runtime) = start_service(&temp);

    service
        .get_or_compute_embedding("fresh", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();
    let purged = service.purge_expired(chrono::Duration::hours(1)).unwrap();
    assert_eq!(purged, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_survives_restart() {
    let temp = TempDir::new().unwrap();

    {
        let (service, runtime) = start_service(&temp);
        service
            .get_or_compute_embedding("persistent text", MODEL, PoolingMethod::Mean, "")
            .await
            .unwrap();
        assert_eq!(runtime.calls(), 1);
        service.shutdown().await.unwrap();
    }

    let (service, runtime) = start_service(&temp);
    service
        .get_or_compute_embedding("persistent text", MODEL, PoolingMethod::Mean, "")
        .await
        .unwrap();
    assert_eq!(runtime.calls(), 0, "restart must not lose the cache");

    service.shutdown().await.unwrap();
}
