use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{ImpactError, Result};

use super::BlobStore;

/// In-process store for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ImpactError {
    ImpactError::Storage("memory store lock poisoned".to_string())
}

impl BlobStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        Ok(blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put("a/1.json", b"1").unwrap();
        store.put("a/2.json", b"2").unwrap();
        store.put("b/1.json", b"3").unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.list("a/").unwrap(), vec!["a/1.json", "a/2.json"]);
        assert!(store.delete("a/1.json").unwrap());
        assert!(store.get("a/1.json").unwrap().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put("k", b"v").unwrap();
        assert_eq!(other.get("k").unwrap().unwrap(), b"v");
    }
}
