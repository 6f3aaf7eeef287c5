use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::HashAlgorithm;
use crate::error::Result;
use crate::index::{keys, read_json, write_json, BlobStore};

/// Hex digest of `data`
pub fn content_hash(data: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Xxh3 => format!("{:032x}", xxhash_rust::xxh3::xxh3_128(data)),
    }
}

/// Path -> content hash registry persisted as `index/hashes.json`.
///
/// Saves rewrite the whole registry. A registry that fails to decode is
/// treated as empty, so every file reads as changed on the next pass.
pub struct HashManager {
    store: Arc<dyn BlobStore>,
    algorithm: HashAlgorithm,
    registry: BTreeMap<String, String>,
    dirty: bool,
}

impl HashManager {
    pub fn new(store: Arc<dyn BlobStore>, algorithm: HashAlgorithm) -> Self {
        let registry = read_json(store.as_ref(), keys::HASHES).unwrap_or_default();
        Self {
            store,
            algorithm,
            registry,
            dirty: false,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hash_content(&self, data: &[u8]) -> String {
        content_hash(data, self.algorithm)
    }

    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let data = std::fs::read(path)?;
        Ok(self.hash_content(&data))
    }

    /// Missing entries count as changed
    pub fn has_changed(&self, path: &str, new_hash: &str) -> bool {
        self.registry.get(path).map(|h| h != new_hash).unwrap_or(true)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.registry.get(path).map(|s| s.as_str())
    }

    pub fn update(&mut self, path: &str, hash: &str) {
        if self.registry.get(path).map(|h| h.as_str()) != Some(hash) {
            self.registry.insert(path.to_string(), hash.to_string());
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.registry.remove(path).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drops every entry not in `keep`
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        let before = self.registry.len();
        self.registry.retain(|path, _| keep(path));
        self.dirty |= self.registry.len() != before;
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.registry
    }

    /// Persists the registry if anything changed since the last save
    pub fn save(&mut self) -> Result<()> {
        if self.dirty {
            write_json(self.store.as_ref(), keys::HASHES, &self.registry)?;
            self.dirty = false;
        }
        Ok(())
    }
}
