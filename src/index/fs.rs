use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{ImpactError, Result};

use super::BlobStore;

/// Directory-backed store; each key is a file below `root`
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == "..") || key.starts_with('/') {
            return Err(ImpactError::Storage(format!("Invalid key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so readers never observe a half-written blob
        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(".tmp-") || !name.starts_with(name_prefix) {
                continue;
            }
            if dir_part.is_empty() {
                keys.push(name);
            } else {
                keys.push(format!("{}/{}", dir_part, name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();

        store.put("index/deps/graph.json", b"{}").unwrap();
        assert!(temp_dir.path().join("index/deps/graph.json").exists());
        assert_eq!(store.get("index/deps/graph.json").unwrap().unwrap(), b"{}");
    }

    #[test]
    fn test_get_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();
        assert!(store.get("nope.json").unwrap().is_none());
        assert!(!store.exists("nope.json").unwrap());
    }

    #[test]
    fn test_list_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();

        store.put("history/snapshots/b.json", b"1").unwrap();
        store.put("history/snapshots/a.json.gz", b"2").unwrap();
        store.put("history/metadata/a.json", b"3").unwrap();

        let keys = store.list("history/snapshots/").unwrap();
        assert_eq!(
            keys,
            vec!["history/snapshots/a.json.gz", "history/snapshots/b.json"]
        );

        let keys = store.list("history/snapshots/b").unwrap();
        assert_eq!(keys, vec!["history/snapshots/b.json"]);

        assert!(store.list("missing/").unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();

        store.put("x.json", b"1").unwrap();
        assert!(store.delete("x.json").unwrap());
        assert!(!store.delete("x.json").unwrap());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();
        assert!(store.put("../outside.json", b"1").is_err());
        assert!(store.put("/abs.json", b"1").is_err());
    }

    #[test]
    fn test_overwrite_is_whole_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path()).unwrap();

        store.put("a.json", b"long content here").unwrap();
        store.put("a.json", b"short").unwrap();
        assert_eq!(store.get("a.json").unwrap().unwrap(), b"short");
        assert_eq!(store.list("").unwrap(), vec!["a.json"]);
    }
}
