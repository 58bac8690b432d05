//! Bounded-concurrency gate around model invocations.
//!
//! The model runtime is not safely or efficiently reentrant beyond a small
//! fixed parallelism; exceeding it degrades latency for every caller. The
//! gate is a fairness/throughput control, not a correctness one: extra
//! callers suspend on the semaphore until a slot frees.
//!
//! Cancellation: dropping the `run` future before a slot is acquired
//! removes the caller from the wait set without leaking a permit (tokio's
//! semaphore acquire is cancel-safe). After admission the owned permit
//! moves into the blocking task, so the compute finishes and releases the
//! slot even if the caller has gone away.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::EmbeddingError;

/// Admits at most N concurrent model computations.
#[derive(Clone)]
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl InferenceGate {
    /// Create a gate admitting `limit` concurrent computations (min 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Configured slot count.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a compute closure once a slot is available.
    ///
    /// The closure executes on the blocking pool; model forward passes are
    /// CPU-bound and must not stall the async runtime.
    pub async fn run<F, T>(&self, compute: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EmbeddingError::Inference("Gate closed".to_string()))?;
        debug!(available = self.available(), "Inference slot acquired");

        tokio::task::spawn_blocking(move || {
            let result = compute();
            drop(permit);
            result
        })
        .await
        .map_err(|e| EmbeddingError::Inference(format!("Compute task failed: {}", e)))?
    }
}
