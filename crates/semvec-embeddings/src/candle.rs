//! Candle-based inference runtime.
//!
//! Runs all-MiniLM-L6-v2 and returns the raw token-level embedding matrix;
//! pooling is a separate, deterministic step (see [`crate::pooling`]).

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::cache::{get_or_download_model, ModelCache};
use crate::error::EmbeddingError;
use crate::runtime::{InferenceRuntime, ModelInfo};

/// Token embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length
pub const MAX_SEQ_LENGTH: usize = 256;

/// Candle-based runtime using all-MiniLM-L6-v2.
pub struct CandleRuntime {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    info: ModelInfo,
}

impl CandleRuntime {
    /// Load the model from cache (downloading if needed).
    pub fn load(cache: &ModelCache) -> Result<Self, EmbeddingError> {
        let paths = get_or_download_model(cache)?;
        Self::load_from_paths(&paths.config, &paths.tokenizer, &paths.weights)
    }

    /// Load with default cache settings
    pub fn load_default() -> Result<Self, EmbeddingError> {
        let cache = ModelCache::default();
        Self::load(&cache)
    }

    /// Load from explicit file paths
    pub fn load_from_paths(
        config_path: &std::path::Path,
        tokenizer_path: &std::path::Path,
        weights_path: &std::path::Path,
    ) -> Result<Self, EmbeddingError> {
        info!("Loading inference model...");

        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(config_path)?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("Invalid config: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DType::F32, &device)?
        };

        let model = BertModel::load(vb, &config)?;

        info!(
            dim = EMBEDDING_DIM,
            max_seq = MAX_SEQ_LENGTH,
            "Model loaded successfully"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            info: ModelInfo {
                name: "all-MiniLM-L6-v2".to_string(),
                dimension: EMBEDDING_DIM,
                max_sequence_length: MAX_SEQ_LENGTH,
            },
        })
    }
}

impl InferenceRuntime for CandleRuntime {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed_tokens(&self, text: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Text tokenized to zero tokens".to_string(),
            ));
        }
        let seq_len = ids.len().min(MAX_SEQ_LENGTH);
        let ids: Vec<u32> = ids[..seq_len].to_vec();
        let mask: Vec<u32> = encoding.get_attention_mask()[..seq_len].to_vec();

        let input_ids = Tensor::from_vec(ids, (1, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask.clone(), (1, seq_len), &self.device)?;
        let token_type_ids = Tensor::zeros_like(&input_ids)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // (1, seq, dim) -> rows for real (unmasked) tokens only
        let all_rows: Vec<Vec<f32>> = output.squeeze(0)?.to_vec2()?;
        let matrix: Vec<Vec<f32>> = all_rows
            .into_iter()
            .zip(mask.iter())
            .filter(|(_, m)| **m == 1)
            .map(|(row, _)| row)
            .collect();

        debug!(tokens = matrix.len(), dim = EMBEDDING_DIM, "Token matrix ready");
        Ok(matrix)
    }
}
