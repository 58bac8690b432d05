//! # semvec-pipeline
//!
//! Serialized write pipeline for the embedding store.
//!
//! Many concurrent producers, one logical writer: tasks enter a bounded
//! queue, coalesce on their dedup key while in flight, commit in small
//! atomic batches, and retry transient storage contention with exponential
//! backoff plus jitter. Every caller gets the terminal outcome of the task
//! it rode, exactly once.

pub mod error;
pub mod pipeline;
pub mod retry;
pub mod task;
pub mod writer;

pub use error::PipelineError;
pub use pipeline::WritePipeline;
pub use retry::RetryPolicy;
pub use task::{DedupKey, WriteOutcome, WriteRequest, WriteTask, WriteTicket};
pub use writer::{CommitNotice, PipelineConfig, WriteBackend};
