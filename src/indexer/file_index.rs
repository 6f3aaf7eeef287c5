//! Project file index.
//!
//! `index/files.json` is the source of truth. `index/mtime-cache.json` only
//! lets incremental passes skip hashing files whose modification time did not
//! move; it can be dropped at any time and is rebuilt by the next full scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{keys, read_json, write_json, BlobStore, FileMetadata};
use crate::indexer::hash::HashManager;
use crate::indexer::walker::{relative_path, FileWalker};

/// Outcome of an incremental pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalOutcome {
    /// New or content-changed files
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Same mtime, or same hash after an mtime touch
    pub unchanged: Vec<String>,
}

impl IncrementalOutcome {
    pub fn changed(&self) -> impl Iterator<Item = &String> {
        self.updated.iter().chain(self.removed.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

pub struct Indexer {
    root: PathBuf,
    store: Arc<dyn BlobStore>,
    walker: FileWalker,
    hashes: HashManager,
    files: BTreeMap<String, FileMetadata>,
    mtimes: BTreeMap<String, i64>,
}

impl Indexer {
    pub fn new(
        root: impl AsRef<Path>,
        store: Arc<dyn BlobStore>,
        walker: FileWalker,
        hashes: HashManager,
    ) -> Self {
        let files = read_json(store.as_ref(), keys::FILES).unwrap_or_default();
        let mtimes = read_json(store.as_ref(), keys::MTIME_CACHE).unwrap_or_default();
        Self {
            root: root.as_ref().to_path_buf(),
            store,
            walker,
            hashes,
            files,
            mtimes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &BTreeMap<String, FileMetadata> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&FileMetadata> {
        self.files.get(path)
    }

    pub fn hashes(&self) -> &HashManager {
        &self.hashes
    }

    pub fn walker(&self) -> &FileWalker {
        &self.walker
    }

    /// Walks the whole tree and rebuilds the index from scratch
    pub fn scan_project(&mut self) -> Result<&BTreeMap<String, FileMetadata>> {
        let paths = self.walker.walk(&self.root)?;
        let mut files = BTreeMap::new();
        let mut mtimes = BTreeMap::new();

        for path in &paths {
            let Some(rel) = relative_path(&self.root, path) else {
                continue;
            };
            match self.read_metadata(path, &rel) {
                Ok(meta) => {
                    self.hashes.update(&rel, &meta.hash);
                    mtimes.insert(rel.clone(), meta.last_modified);
                    files.insert(rel, meta);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        self.hashes.retain(|p| files.contains_key(p));
        self.files = files;
        self.mtimes = mtimes;
        self.persist_index()?;
        self.persist_mtimes()?;

        tracing::info!("Indexed {} files under {}", self.files.len(), self.root.display());
        Ok(&self.files)
    }

    /// Re-indexes only the given paths (absolute or project-relative)
    pub fn incremental_index(&mut self, changed: &[PathBuf]) -> Result<IncrementalOutcome> {
        let mut outcome = IncrementalOutcome::default();
        let mut index_dirty = false;
        let mut mtimes_dirty = false;

        for candidate in changed {
            let Some(rel) = relative_path(&self.root, candidate) else {
                tracing::debug!("Ignoring path outside root: {}", candidate.display());
                continue;
            };
            let abs = self.root.join(&rel);

            if !abs.is_file() {
                if self.files.remove(&rel).is_some() {
                    self.hashes.remove(&rel);
                    outcome.removed.push(rel.clone());
                    index_dirty = true;
                }
                mtimes_dirty |= self.mtimes.remove(&rel).is_some();
                continue;
            }

            if !self.walker.is_tracked(&rel) {
                continue;
            }

            let mtime = match file_mtime(&abs) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Cannot stat {}: {}", abs.display(), e);
                    continue;
                }
            };

            if self.files.contains_key(&rel) && self.mtimes.get(&rel) == Some(&mtime) {
                outcome.unchanged.push(rel);
                continue;
            }

            let meta = match self.read_metadata(&abs, &rel) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", abs.display(), e);
                    continue;
                }
            };

            self.mtimes.insert(rel.clone(), mtime);
            mtimes_dirty = true;

            if self.files.contains_key(&rel) && !self.hashes.has_changed(&rel, &meta.hash) {
                // touched but identical content
                outcome.unchanged.push(rel);
                continue;
            }

            self.hashes.update(&rel, &meta.hash);
            self.files.insert(rel.clone(), meta);
            outcome.updated.push(rel);
            index_dirty = true;
        }

        // Index first: a crash before the cache write only costs a rehash
        if index_dirty {
            self.persist_index()?;
        }
        if mtimes_dirty {
            self.persist_mtimes()?;
        }

        tracing::debug!(
            "Incremental index: {} updated, {} removed, {} unchanged",
            outcome.updated.len(),
            outcome.removed.len(),
            outcome.unchanged.len()
        );
        Ok(outcome)
    }

    fn read_metadata(&self, abs: &Path, rel: &str) -> Result<FileMetadata> {
        let data = std::fs::read(abs)?;
        let hash = self.hashes.hash_content(&data);
        let line_count = count_lines(&data);

        Ok(FileMetadata {
            path: rel.to_string(),
            hash,
            size: data.len() as u64,
            line_count,
            language: self.walker.get_language(abs).unwrap_or_else(|| "unknown".to_string()),
            last_modified: file_mtime(abs)?,
            indexed_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    fn persist_index(&mut self) -> Result<()> {
        write_json(self.store.as_ref(), keys::FILES, &self.files)?;
        self.hashes.save()
    }

    fn persist_mtimes(&self) -> Result<()> {
        write_json(self.store.as_ref(), keys::MTIME_CACHE, &self.mtimes)
    }
}

fn file_mtime(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

fn count_lines(data: &[u8]) -> usize {
    if data.is_empty() {
        return 0;
    }
    let newlines = data.iter().filter(|&&b| b == b'\n').count();
    if data.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashAlgorithm;
    use crate::index::MemoryStore;
    use crate::indexer::walker::IgnoreRules;
    use crate::languages::LanguageRegistry;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn indexer(root: &Path, store: &MemoryStore) -> Indexer {
        let store: Arc<dyn BlobStore> = Arc::new(store.clone());
        let hashes = HashManager::new(Arc::clone(&store), HashAlgorithm::Sha256);
        Indexer::new(root, store, FileWalker::new(LanguageRegistry::new()), hashes)
    }

    fn set_mtime(path: &Path, offset_secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"a"), 1);
        assert_eq!(count_lines(b"a\n"), 1);
        assert_eq!(count_lines(b"a\nb"), 2);
        assert_eq!(count_lines(b"a\nb\n"), 2);
    }

    #[test]
    fn test_scan_project_records_metadata() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "src/a.ts", "export const a = 1;\nexport const b = 2;\n");
        create_file(temp_dir.path(), "src/b.js", "module.exports = {};");
        create_file(temp_dir.path(), "notes.md", "# notes");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        let files = indexer.scan_project().unwrap();

        assert_eq!(files.len(), 2);
        let a = &files["src/a.ts"];
        assert_eq!(a.line_count, 2);
        assert_eq!(a.language, "typescript");
        assert_eq!(a.hash.len(), 64);
        assert_eq!(files["src/b.js"].language, "javascript");

        assert!(store.get(keys::FILES).unwrap().is_some());
        assert!(store.get(keys::HASHES).unwrap().is_some());
        assert!(store.get(keys::MTIME_CACHE).unwrap().is_some());
    }

    #[test]
    fn test_incremental_and_full_scan_track_same_files() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), ".gitignore", "gen-*/\n");
        create_file(temp_dir.path(), "a.ts", "export const a = 1;");
        create_file(temp_dir.path(), ".hidden.ts", "export const h = 1;");
        create_file(temp_dir.path(), "gen-api/client.ts", "export const c = 1;");

        let store = MemoryStore::new();
        let shared: Arc<dyn BlobStore> = Arc::new(store.clone());
        let rules = IgnoreRules::new(&[]).with_gitignore(temp_dir.path());
        let walker = FileWalker::with_rules(LanguageRegistry::new(), rules);
        let hashes = HashManager::new(Arc::clone(&shared), HashAlgorithm::Sha256);
        let mut indexer = Indexer::new(temp_dir.path(), shared, walker, hashes);

        let scanned: Vec<String> = indexer.scan_project().unwrap().keys().cloned().collect();
        assert_eq!(scanned, vec!["a.ts"]);

        let outcome = indexer
            .incremental_index(&[
                PathBuf::from(".hidden.ts"),
                PathBuf::from("gen-api/client.ts"),
                PathBuf::from("a.ts"),
            ])
            .unwrap();
        assert!(outcome.updated.is_empty());
        let after: Vec<String> = indexer.files().keys().cloned().collect();
        assert_eq!(after, scanned);
    }

    #[test]
    fn test_index_reloads_from_store() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "1");

        let store = MemoryStore::new();
        indexer(temp_dir.path(), &store).scan_project().unwrap();

        let reloaded = indexer(temp_dir.path(), &store);
        assert!(reloaded.get("a.ts").is_some());
        assert_eq!(reloaded.hashes().len(), 1);
    }

    #[test]
    fn test_incremental_detects_content_change() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "export const a = 1;");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        indexer.scan_project().unwrap();
        let before = indexer.get("a.ts").unwrap().hash.clone();

        create_file(temp_dir.path(), "a.ts", "export const a = 2;");
        set_mtime(&temp_dir.path().join("a.ts"), 10);

        let outcome = indexer.incremental_index(&[PathBuf::from("a.ts")]).unwrap();
        assert_eq!(outcome.updated, vec!["a.ts"]);
        assert_ne!(indexer.get("a.ts").unwrap().hash, before);
    }

    #[test]
    fn test_incremental_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "export const a = 1;");
        create_file(temp_dir.path(), "b.ts", "export const b = 1;");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        indexer.scan_project().unwrap();

        let paths = vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")];
        let files_before = indexer.files().clone();
        let first = indexer.incremental_index(&paths).unwrap();
        let second = indexer.incremental_index(&paths).unwrap();

        assert!(first.is_noop());
        assert!(second.is_noop());
        assert_eq!(second.unchanged.len(), 2);
        assert_eq!(indexer.files(), &files_before);
    }

    #[test]
    fn test_incremental_mtime_touch_without_content_change() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "export const a = 1;");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        indexer.scan_project().unwrap();
        let before = indexer.get("a.ts").unwrap().clone();

        set_mtime(&temp_dir.path().join("a.ts"), 60);
        let outcome = indexer.incremental_index(&[PathBuf::from("a.ts")]).unwrap();

        assert!(outcome.is_noop());
        assert_eq!(outcome.unchanged, vec!["a.ts"]);
        assert_eq!(indexer.get("a.ts").unwrap(), &before);

        // the refreshed mtime now short-circuits
        let outcome = indexer.incremental_index(&[PathBuf::from("a.ts")]).unwrap();
        assert_eq!(outcome.unchanged, vec!["a.ts"]);
    }

    #[test]
    fn test_incremental_removes_deleted_file() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "1");
        create_file(temp_dir.path(), "b.ts", "2");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        indexer.scan_project().unwrap();

        fs::remove_file(temp_dir.path().join("b.ts")).unwrap();
        let outcome = indexer
            .incremental_index(&[temp_dir.path().join("b.ts")])
            .unwrap();

        assert_eq!(outcome.removed, vec!["b.ts"]);
        assert!(indexer.get("b.ts").is_none());
        assert!(indexer.hashes().get("b.ts").is_none());
    }

    #[test]
    fn test_incremental_adds_new_file() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "1");

        let store = MemoryStore::new();
        let mut indexer = indexer(temp_dir.path(), &store);
        indexer.scan_project().unwrap();

        create_file(temp_dir.path(), "src/new.ts", "export {}");
        let outcome = indexer
            .incremental_index(&[PathBuf::from("src/new.ts"), PathBuf::from("README.md")])
            .unwrap();

        assert_eq!(outcome.updated, vec!["src/new.ts"]);
        assert_eq!(indexer.files().len(), 2);
    }

    #[test]
    fn test_dropped_mtime_cache_self_heals() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "a.ts", "1");

        let store = MemoryStore::new();
        indexer(temp_dir.path(), &store).scan_project().unwrap();
        store.delete(keys::MTIME_CACHE).unwrap();

        let mut indexer = indexer(temp_dir.path(), &store);
        let outcome = indexer.incremental_index(&[PathBuf::from("a.ts")]).unwrap();

        // rehashed, found identical, cache repopulated
        assert!(outcome.is_noop());
        assert!(store.get(keys::MTIME_CACHE).unwrap().is_some());
    }
}
