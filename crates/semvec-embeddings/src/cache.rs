//! Model file caching.
//!
//! Downloads and caches model files from HuggingFace Hub. The cache
//! directory can be redirected onto the RAM-disk staging area once model
//! files have been verified there.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;

/// Default model repository on HuggingFace
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Required model files
pub const MODEL_FILES: &[&str] = &["config.json", "tokenizer.json", "model.safetensors"];

/// A weights file smaller than this is a failed or truncated download,
/// not a valid model.
pub const MIN_WEIGHTS_BYTES: u64 = 1024 * 1024;

/// Model cache configuration
#[derive(Debug, Clone)]
pub struct ModelCache {
    /// Cache directory path
    pub cache_dir: PathBuf,
    /// Model repository ID
    pub repo_id: String,
}

impl Default for ModelCache {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("semvec")
            .join("models");

        Self {
            cache_dir,
            repo_id: DEFAULT_MODEL_REPO.to_string(),
        }
    }
}

impl ModelCache {
    /// Create a new model cache with custom settings
    pub fn new(cache_dir: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            repo_id: repo_id.into(),
        }
    }

    /// Point the cache at a different base directory (e.g. a mounted RAM
    /// disk) without changing the repository.
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.cache_dir = base.into();
        self
    }

    /// Get the model directory path
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(self.repo_id.replace('/', "_"))
    }

    /// Check if all model files are cached
    pub fn is_cached(&self) -> bool {
        let model_dir = self.model_dir();
        MODEL_FILES.iter().all(|f| model_dir.join(f).exists())
    }

    /// Get path to a specific model file
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.model_dir().join(filename)
    }
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Get or download model files.
///
/// Returns paths to config.json, tokenizer.json, and model.safetensors.
pub fn get_or_download_model(cache: &ModelCache) -> Result<ModelPaths, EmbeddingError> {
    let model_dir = cache.model_dir();

    if cache.is_cached() {
        debug!(path = ?model_dir, "Using cached model");
    } else {
        info!(repo = %cache.repo_id, "Downloading model files...");
        download_model_files(cache)?;
    }

    verify_weights(cache)?;

    Ok(ModelPaths {
        config: model_dir.join("config.json"),
        tokenizer: model_dir.join("tokenizer.json"),
        weights: model_dir.join("model.safetensors"),
    })
}

/// Download model files from HuggingFace Hub
fn download_model_files(cache: &ModelCache) -> Result<(), EmbeddingError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(cache.repo_id.clone());

    std::fs::create_dir_all(cache.model_dir())?;

    for filename in MODEL_FILES {
        info!(file = filename, "Downloading...");
        let source_path = repo
            .get(filename)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", filename, e)))?;

        let dest_path = cache.file_path(filename);
        std::fs::copy(&source_path, &dest_path)?;
        debug!(file = filename, "Downloaded to {:?}", dest_path);
    }

    Ok(())
}

/// Reject a weights file too small to be a real model. A truncated
/// download is removed so the next call re-fetches it.
fn verify_weights(cache: &ModelCache) -> Result<(), EmbeddingError> {
    let weights = cache.file_path("model.safetensors");
    let size = std::fs::metadata(&weights)
        .map_err(|_| EmbeddingError::ModelNotFound(weights.display().to_string()))?
        .len();
    if size < MIN_WEIGHTS_BYTES {
        warn!(path = ?weights, size = size, "Weights file too small, removing");
        std::fs::remove_file(&weights)?;
        return Err(EmbeddingError::Download(format!(
            "Weights file too small ({} bytes), probably not a valid model",
            size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_default() {
        let cache = ModelCache::default();
        assert!(cache.cache_dir.to_string_lossy().contains("semvec"));
        assert_eq!(cache.repo_id, DEFAULT_MODEL_REPO);
    }

    #[test]
    fn test_is_cached_empty() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::new(temp.path(), "test/model");
        assert!(!cache.is_cached());
    }

    #[test]
    fn test_with_base_dir_redirects() {
        let cache = ModelCache::new("/original", "test/model").with_base_dir("/mnt/ram");
        assert!(cache.model_dir().starts_with("/mnt/ram"));
    }

    #[test]
    fn test_verify_weights_rejects_small_file() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::new(temp.path(), "test/model");
        std::fs::create_dir_all(cache.model_dir()).unwrap();
        std::fs::write(cache.file_path("model.safetensors"), b"tiny").unwrap();

        let result = verify_weights(&cache);
        assert!(matches!(result, Err(EmbeddingError::Download(_))));
        // The truncated file is removed so a retry can re-download
        assert!(!cache.file_path("model.safetensors").exists());
    }
}
