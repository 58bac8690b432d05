//! Binary key encodings.
//!
//! Embedding keys sort by (model, pooling, text_hash, corpus) so a prefix
//! scan over one (model, pooling) pair yields a deterministic order that is
//! stable across restarts (the index builder relies on shard row order
//! equaling store scan order), and a (model, pooling, text_hash) prefix
//! finds a text's record without knowing its corpus.

use semvec_types::PoolingMethod;

use crate::error::StorageError;

/// Separator between key components. Component strings must not contain it.
const SEP: u8 = 0x00;

/// Key for one embedding record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingKey {
    pub model_id: String,
    pub pooling_method: PoolingMethod,
    pub corpus_id: String,
    pub text_hash: String,
}

impl EmbeddingKey {
    pub fn new(
        model_id: impl Into<String>,
        pooling_method: PoolingMethod,
        corpus_id: impl Into<String>,
        text_hash: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let key = Self {
            model_id: model_id.into(),
            pooling_method,
            corpus_id: corpus_id.into(),
            text_hash: text_hash.into(),
        };
        for part in [&key.model_id, &key.corpus_id, &key.text_hash] {
            if part.as_bytes().contains(&SEP) {
                return Err(StorageError::InvalidKey(
                    "Key component contains NUL byte".to_string(),
                ));
            }
        }
        Ok(key)
    }

    /// Encode to the stored byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.model_id.len() + self.corpus_id.len() + self.text_hash.len() + 32,
        );
        out.extend_from_slice(self.model_id.as_bytes());
        out.push(SEP);
        out.extend_from_slice(self.pooling_method.as_str().as_bytes());
        out.push(SEP);
        out.extend_from_slice(self.text_hash.as_bytes());
        out.push(SEP);
        out.extend_from_slice(self.corpus_id.as_bytes());
        out
    }

    /// Decode from the stored byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let parts: Vec<&[u8]> = bytes.splitn(4, |b| *b == SEP).collect();
        if parts.len() != 4 {
            return Err(StorageError::InvalidKey(format!(
                "Expected 4 key components, found {}",
                parts.len()
            )));
        }
        let decode = |part: &[u8]| {
            String::from_utf8(part.to_vec())
                .map_err(|e| StorageError::InvalidKey(format!("Non-UTF8 key component: {}", e)))
        };
        let pooling_name = decode(parts[1])?;
        let pooling_method = PoolingMethod::parse(&pooling_name)
            .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        Ok(Self {
            model_id: decode(parts[0])?,
            pooling_method,
            text_hash: decode(parts[2])?,
            corpus_id: decode(parts[3])?,
        })
    }

    /// Scan prefix covering every corpus for one (model, pooling) pair.
    pub fn shard_prefix(model_id: &str, pooling_method: PoolingMethod) -> Vec<u8> {
        let mut out = Vec::with_capacity(model_id.len() + 32);
        out.extend_from_slice(model_id.as_bytes());
        out.push(SEP);
        out.extend_from_slice(pooling_method.as_str().as_bytes());
        out.push(SEP);
        out
    }

    /// Scan prefix for one text across corpora.
    pub fn text_prefix(
        model_id: &str,
        pooling_method: PoolingMethod,
        text_hash: &str,
    ) -> Vec<u8> {
        let mut out = Self::shard_prefix(model_id, pooling_method);
        out.extend_from_slice(text_hash.as_bytes());
        out.push(SEP);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = EmbeddingKey::new("m1", PoolingMethod::Svd, "corpus-a", "abc123").unwrap();
        let decoded = EmbeddingKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_key_rejects_nul_component() {
        assert!(EmbeddingKey::new("m\x001", PoolingMethod::Mean, "", "h").is_err());
    }

    #[test]
    fn test_shard_prefix_matches_key() {
        let key = EmbeddingKey::new("m1", PoolingMethod::Mean, "c", "hash").unwrap();
        let prefix = EmbeddingKey::shard_prefix("m1", PoolingMethod::Mean);
        assert!(key.to_bytes().starts_with(&prefix));

        let other = EmbeddingKey::shard_prefix("m1", PoolingMethod::Svd);
        assert!(!key.to_bytes().starts_with(&other));
    }

    #[test]
    fn test_prefix_does_not_bleed_across_models() {
        // "m1" prefix must not match keys for model "m10"
        let key = EmbeddingKey::new("m10", PoolingMethod::Mean, "", "hash").unwrap();
        let prefix = EmbeddingKey::shard_prefix("m1", PoolingMethod::Mean);
        assert!(!key.to_bytes().starts_with(&prefix));
    }

    #[test]
    fn test_text_prefix_matches_every_corpus() {
        let a = EmbeddingKey::new("m1", PoolingMethod::Mean, "corpus-a", "hash1").unwrap();
        let b = EmbeddingKey::new("m1", PoolingMethod::Mean, "corpus-b", "hash1").unwrap();
        let other = EmbeddingKey::new("m1", PoolingMethod::Mean, "corpus-a", "hash2").unwrap();

        let prefix = EmbeddingKey::text_prefix("m1", PoolingMethod::Mean, "hash1");
        assert!(a.to_bytes().starts_with(&prefix));
        assert!(b.to_bytes().starts_with(&prefix));
        assert!(!other.to_bytes().starts_with(&prefix));
    }
}
