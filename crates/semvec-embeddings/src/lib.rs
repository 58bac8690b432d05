//! # semvec-embeddings
//!
//! Local embedding generation for semvec using Candle.
//!
//! The runtime produces raw token-level matrices; the seven pooling
//! reductions turn a matrix into one fixed-length vector; the inference
//! gate bounds how many model invocations run at once.
//!
//! ## Features
//! - Local inference via Candle (no Python, no API)
//! - all-MiniLM-L6-v2 model (384 dimensions)
//! - Automatic model file caching, redirectable onto a RAM disk
//! - Deterministic pooling so cache keys stay content-addressed

pub mod cache;
pub mod candle;
pub mod error;
pub mod gate;
pub mod linalg;
pub mod pooling;
pub mod runtime;

pub use crate::candle::CandleRuntime;
pub use cache::{get_or_download_model, ModelCache, ModelPaths, DEFAULT_MODEL_REPO, MODEL_FILES};
pub use error::EmbeddingError;
pub use gate::InferenceGate;
pub use pooling::pool;
pub use runtime::{InferenceRuntime, ModelInfo};
