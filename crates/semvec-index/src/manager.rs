//! Shard lifecycle: build, publish, refresh.
//!
//! The manager owns one shard per (model, pooling) pair, published behind
//! an Arc swap: readers hold whatever shard was current when they looked,
//! and a rebuild replaces the map entry wholesale. Nobody ever observes a
//! half-built shard.
//!
//! Staleness is tolerated by design. The write pipeline's commit notices
//! mark shards dirty; `refresh` rebuilds a dirty shard, and callers that
//! need freshness request it explicitly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use semvec_storage::EmbeddingStore;
use semvec_types::PoolingMethod;

use crate::error::IndexError;
use crate::shard::{HnswParams, IndexShard};

type ShardKey = (String, PoolingMethod);

/// Builds and publishes index shards from committed store contents.
/// Read-only with respect to the store.
pub struct IndexManager {
    store: Arc<EmbeddingStore>,
    params: HnswParams,
    shards: RwLock<HashMap<ShardKey, Arc<IndexShard>>>,
    dirty: Mutex<HashSet<ShardKey>>,
}

impl IndexManager {
    pub fn new(store: Arc<EmbeddingStore>, params: HnswParams) -> Self {
        Self {
            store,
            params,
            shards: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Scan committed records for the pair, build a shard, publish it
    /// atomically. Returns the row count.
    pub fn build(&self, model_id: &str, pooling: PoolingMethod) -> Result<usize, IndexError> {
        let records = self.store.scan_embeddings(model_id, pooling)?;
        let shard = IndexShard::build(&records, &self.params)?;
        let rows = shard.len();

        let key = (model_id.to_string(), pooling);
        self.shards
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), Arc::new(shard));
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);

        info!(model = %model_id, pooling = %pooling, rows = rows, "Published index shard");
        Ok(rows)
    }

    /// Record that commits landed for the pair since the last build.
    pub fn mark_dirty(&self, model_id: &str, pooling: PoolingMethod) {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((model_id.to_string(), pooling));
        debug!(model = %model_id, pooling = %pooling, "Shard marked dirty");
    }

    /// Rebuild the pair's shard when dirty (or never built). Returns true
    /// when a rebuild happened.
    pub fn refresh(&self, model_id: &str, pooling: PoolingMethod) -> Result<bool, IndexError> {
        let key = (model_id.to_string(), pooling);
        let needs_build = {
            let dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            let shards = self.shards.read().unwrap_or_else(|e| e.into_inner());
            dirty.contains(&key) || !shards.contains_key(&key)
        };
        if !needs_build {
            return Ok(false);
        }
        self.build(model_id, pooling)?;
        Ok(true)
    }

    /// Refresh every dirty shard. Returns the number rebuilt.
    pub fn refresh_all_dirty(&self) -> Result<usize, IndexError> {
        let keys: Vec<ShardKey> = self
            .dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for (model_id, pooling) in &keys {
            self.build(model_id, *pooling)?;
        }
        Ok(keys.len())
    }

    /// Current shard for the pair, if one has been published.
    pub fn shard(&self, model_id: &str, pooling: PoolingMethod) -> Option<Arc<IndexShard>> {
        self.shards
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(model_id.to_string(), pooling))
            .cloned()
    }

    /// Rows in the current shard (0 when none is published).
    pub fn corpus_size(&self, model_id: &str, pooling: PoolingMethod) -> usize {
        self.shard(model_id, pooling).map_or(0, |s| s.len())
    }

    /// Coarse lookup against the current shard. An unknown or empty pair
    /// yields an empty result, not an error.
    pub fn lookup(
        &self,
        model_id: &str,
        pooling: PoolingMethod,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>, IndexError> {
        match self.shard(model_id, pooling) {
            Some(shard) => shard.lookup(query, k),
            None => Ok(Vec::new()),
        }
    }
}
