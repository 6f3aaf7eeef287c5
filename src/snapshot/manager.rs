//! Snapshot storage: save/load, tagging, retention, compression and
//! portable export/import.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RetentionConfig;
use crate::error::{ImpactError, Result};
use crate::index::{gunzip, gzip, keys, read_json, write_json, BlobStore, Snapshot, SnapshotMetadata};

const EXPORT_FORMAT_VERSION: u32 = 1;
const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// History entry; built without loading the snapshot body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub timestamp: i64,
    pub compressed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub deleted: Vec<String>,
    pub compressed: Vec<String>,
}

/// Single-file portable form of a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotExport {
    pub format_version: u32,
    pub exported_at: String,
    pub snapshot: Snapshot,
    pub metadata: SnapshotMetadata,
}

/// Millisecond timestamp encoded in a snapshot id
pub fn id_timestamp(id: &str) -> Option<i64> {
    id.split('-').next()?.parse().ok()
}

pub struct SnapshotManager {
    store: Arc<dyn BlobStore>,
    retention: RetentionConfig,
    compress_after_hours: i64,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn BlobStore>, retention: RetentionConfig, compress_after_hours: i64) -> Self {
        Self {
            store,
            retention,
            compress_after_hours,
        }
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        write_json(self.store.as_ref(), &keys::snapshot(&snapshot.id, false), snapshot)?;
        tracing::debug!("Saved snapshot {} ({} files)", snapshot.id, snapshot.files.len());
        Ok(())
    }

    /// Loads a snapshot, decompressing transparently
    pub fn load(&self, id: &str) -> Result<Snapshot> {
        for compressed in [false, true] {
            let key = keys::snapshot(id, compressed);
            if self.store.exists(&key)? {
                return read_json(self.store.as_ref(), &key).ok_or_else(|| {
                    ImpactError::Storage(format!("Snapshot {} is unreadable", id))
                });
            }
        }
        Err(ImpactError::SnapshotNotFound(id.to_string()))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.store.exists(&keys::snapshot(id, false))? || self.store.exists(&keys::snapshot(id, true))?)
    }

    fn is_compressed(&self, id: &str) -> Result<bool> {
        self.store.exists(&keys::snapshot(id, true))
    }

    /// All snapshot ids, oldest first
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .store
            .list(keys::SNAPSHOT_PREFIX)?
            .iter()
            .filter_map(|key| {
                let name = key.strip_prefix(keys::SNAPSHOT_PREFIX)?;
                name.strip_suffix(".json.gz")
                    .or_else(|| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Newest readable snapshot. Unreadable ones are skipped with a warning.
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        for id in self.list_ids()?.iter().rev() {
            match self.load(id) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => tracing::warn!("Skipping snapshot {}: {}", id, e),
            }
        }
        Ok(None)
    }

    /// Every readable snapshot, oldest first
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for id in self.list_ids()? {
            match self.load(&id) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!("Skipping snapshot {}: {}", id, e),
            }
        }
        Ok(snapshots)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let plain = self.store.delete(&keys::snapshot(id, false))?;
        let packed = self.store.delete(&keys::snapshot(id, true))?;
        self.store.delete(&keys::metadata(id))?;
        Ok(plain || packed)
    }

    pub fn metadata(&self, id: &str) -> SnapshotMetadata {
        read_json(self.store.as_ref(), &keys::metadata(id)).unwrap_or_else(|| SnapshotMetadata::new(id))
    }

    pub fn save_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        write_json(self.store.as_ref(), &keys::metadata(&metadata.snapshot_id), metadata)
    }

    /// Adds tags (deduplicated) and optionally replaces the description
    pub fn tag(&self, id: &str, tags: &[String], description: Option<String>) -> Result<SnapshotMetadata> {
        if !self.exists(id)? {
            return Err(ImpactError::SnapshotNotFound(id.to_string()));
        }
        let mut metadata = self.metadata(id);
        for tag in tags {
            if !metadata.tags.contains(tag) {
                metadata.tags.push(tag.clone());
            }
        }
        if description.is_some() {
            metadata.description = description;
        }
        self.save_metadata(&metadata)?;
        Ok(metadata)
    }

    /// History listing, newest first, optionally restricted to a tag
    pub fn list(&self, offset: usize, limit: usize, tag: Option<&str>) -> Result<Page<SnapshotSummary>> {
        let mut summaries = Vec::new();
        for id in self.list_ids()?.into_iter().rev() {
            let metadata = self.metadata(&id);
            if let Some(tag) = tag {
                if !metadata.tags.iter().any(|t| t == tag) {
                    continue;
                }
            }
            summaries.push(SnapshotSummary {
                timestamp: id_timestamp(&id).unwrap_or_default(),
                compressed: self.is_compressed(&id)?,
                tags: metadata.tags,
                description: metadata.description,
                commit_hash: metadata.commit.map(|c| c.hash),
                id,
            });
        }

        let total = summaries.len();
        let items = summaries.into_iter().skip(offset).take(limit).collect();
        Ok(Page {
            items,
            total,
            offset,
            limit,
        })
    }

    /// Deletes snapshots past the configured age or count.
    ///
    /// The newest snapshot is never deleted; tagged snapshots survive when
    /// `keep_tagged` is set and do not count against `max_count`.
    pub fn enforce_retention(&self, now_ms: i64) -> Result<Vec<String>> {
        let ids = self.list_ids()?;
        let Some((newest, older)) = ids.split_last() else {
            return Ok(Vec::new());
        };

        let mut kept = 1usize;
        let mut deleted = Vec::new();
        for id in older.iter().rev() {
            if self.retention.keep_tagged && !self.metadata(id).tags.is_empty() {
                continue;
            }
            let age_ms = now_ms - id_timestamp(id).unwrap_or(now_ms);
            let too_old = self
                .retention
                .max_age_days
                .is_some_and(|days| age_ms > days * MS_PER_DAY);
            let over_count = self.retention.max_count.is_some_and(|max| kept >= max);

            if too_old || over_count {
                self.delete(id)?;
                deleted.push(id.clone());
            } else {
                kept += 1;
            }
        }

        if !deleted.is_empty() {
            tracing::info!("Retention removed {} snapshots, newest kept: {}", deleted.len(), newest);
        }
        Ok(deleted)
    }

    /// Gzips plain snapshots older than the configured threshold
    pub fn compress_old(&self, now_ms: i64) -> Result<Vec<String>> {
        let threshold = self.compress_after_hours * MS_PER_HOUR;
        let mut compressed = Vec::new();

        for id in self.list_ids()? {
            let plain_key = keys::snapshot(&id, false);
            let Some(timestamp) = id_timestamp(&id) else {
                continue;
            };
            if now_ms - timestamp < threshold {
                continue;
            }
            let Some(bytes) = self.store.get(&plain_key)? else {
                continue;
            };
            self.store.put(&keys::snapshot(&id, true), &gzip(&bytes)?)?;
            self.store.delete(&plain_key)?;
            compressed.push(id);
        }

        if !compressed.is_empty() {
            tracing::info!("Compressed {} snapshots", compressed.len());
        }
        Ok(compressed)
    }

    pub fn maintain(&self, now_ms: i64) -> Result<MaintenanceReport> {
        let deleted = self.enforce_retention(now_ms)?;
        let compressed = self.compress_old(now_ms)?;
        Ok(MaintenanceReport { deleted, compressed })
    }

    /// Writes snapshot and metadata to one file, gzipped for `.gz` paths
    pub fn export(&self, id: &str, dest: &Path) -> Result<()> {
        let export = SnapshotExport {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            snapshot: self.load(id)?,
            metadata: self.metadata(id),
        };
        let bytes = serde_json::to_vec_pretty(&export)?;
        let bytes = if is_gz(dest) { gzip(&bytes)? } else { bytes };

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(dest, bytes)?;
        tracing::info!("Exported snapshot {} to {}", id, dest.display());
        Ok(())
    }

    /// Imports an exported file; refuses to overwrite an existing id
    pub fn import(&self, src: &Path) -> Result<String> {
        let raw = std::fs::read(src)?;
        let raw = if is_gz(src) { gunzip(&raw)? } else { raw };
        let export: SnapshotExport = serde_json::from_slice(&raw)?;

        if export.format_version > EXPORT_FORMAT_VERSION {
            return Err(ImpactError::Storage(format!(
                "Unsupported export format version {}",
                export.format_version
            )));
        }
        let id = export.snapshot.id.clone();
        if self.exists(&id)? {
            return Err(ImpactError::Storage(format!("Snapshot {} already exists", id)));
        }

        self.save(&export.snapshot)?;
        let mut metadata = export.metadata;
        metadata.snapshot_id = id.clone();
        self.save_metadata(&metadata)?;
        tracing::info!("Imported snapshot {} from {}", id, src.display());
        Ok(id)
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryStore;
    use tempfile::TempDir;

    const DAY: i64 = MS_PER_DAY;

    fn snapshot_at(timestamp: i64) -> Snapshot {
        Snapshot {
            id: Snapshot::generate_id(timestamp),
            timestamp,
            files: Default::default(),
            asts: Default::default(),
            graph: Default::default(),
        }
    }

    fn manager(retention: RetentionConfig) -> SnapshotManager {
        SnapshotManager::new(Arc::new(MemoryStore::new()), retention, 24)
    }

    fn no_limits() -> RetentionConfig {
        RetentionConfig {
            max_count: None,
            max_age_days: None,
            keep_tagged: true,
        }
    }

    #[test]
    fn test_save_load_and_latest() {
        let m = manager(no_limits());
        let a = snapshot_at(1_000);
        let b = snapshot_at(2_000);
        m.save(&b).unwrap();
        m.save(&a).unwrap();

        assert_eq!(m.list_ids().unwrap(), vec![a.id.clone(), b.id.clone()]);
        assert_eq!(m.latest().unwrap().unwrap().id, b.id);
        assert_eq!(m.load(&a.id).unwrap(), a);
        assert!(matches!(m.load("nope"), Err(ImpactError::SnapshotNotFound(_))));
    }

    #[test]
    fn test_compression_is_transparent() {
        let m = manager(no_limits());
        let old = snapshot_at(0);
        let fresh = snapshot_at(10 * DAY);
        m.save(&old).unwrap();
        m.save(&fresh).unwrap();

        let compressed = m.compress_old(10 * DAY + 1).unwrap();
        assert_eq!(compressed, vec![old.id.clone()]);
        assert_eq!(m.load(&old.id).unwrap(), old);
        assert_eq!(m.list_ids().unwrap().len(), 2);

        let page = m.list(0, 10, None).unwrap();
        assert!(page.items.iter().any(|s| s.id == old.id && s.compressed));
    }

    #[test]
    fn test_retention_by_count_keeps_tagged_and_newest() {
        let m = manager(RetentionConfig {
            max_count: Some(2),
            max_age_days: None,
            keep_tagged: true,
        });
        let snaps: Vec<Snapshot> = (1..=5).map(|i| snapshot_at(i * 1_000)).collect();
        for s in &snaps {
            m.save(s).unwrap();
        }
        m.tag(&snaps[0].id, &["release".to_string()], None).unwrap();

        let deleted = m.enforce_retention(10_000).unwrap();
        assert_eq!(deleted, vec![snaps[2].id.clone(), snaps[1].id.clone()]);

        let remaining = m.list_ids().unwrap();
        assert_eq!(remaining, vec![snaps[0].id.clone(), snaps[3].id.clone(), snaps[4].id.clone()]);
    }

    #[test]
    fn test_retention_by_age() {
        let m = manager(RetentionConfig {
            max_count: None,
            max_age_days: Some(30),
            keep_tagged: false,
        });
        let ancient = snapshot_at(0);
        let recent = snapshot_at(40 * DAY);
        let newest = snapshot_at(41 * DAY);
        for s in [&ancient, &recent, &newest] {
            m.save(s).unwrap();
        }
        let deleted = m.enforce_retention(41 * DAY).unwrap();
        assert_eq!(deleted, vec![ancient.id]);
    }

    #[test]
    fn test_newest_survives_age_limit() {
        let m = manager(RetentionConfig {
            max_count: None,
            max_age_days: Some(1),
            keep_tagged: false,
        });
        let only = snapshot_at(0);
        m.save(&only).unwrap();
        assert!(m.enforce_retention(100 * DAY).unwrap().is_empty());
        assert!(m.exists(&only.id).unwrap());
    }

    #[test]
    fn test_list_pagination_and_tag_filter() {
        let m = manager(no_limits());
        let snaps: Vec<Snapshot> = (1..=4).map(|i| snapshot_at(i * 1_000)).collect();
        for s in &snaps {
            m.save(s).unwrap();
        }
        m.tag(&snaps[1].id, &["v1".to_string()], Some("first".to_string())).unwrap();

        let page = m.list(1, 2, None).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, snaps[2].id);

        let tagged = m.list(0, 10, Some("v1")).unwrap();
        assert_eq!(tagged.total, 1);
        assert_eq!(tagged.items[0].description.as_deref(), Some("first"));
    }

    #[test]
    fn test_tag_missing_snapshot_fails() {
        let m = manager(no_limits());
        assert!(m.tag("missing", &["x".to_string()], None).is_err());
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = manager(no_limits());
        let snap = snapshot_at(5_000);
        source.save(&snap).unwrap();
        source.tag(&snap.id, &["keep".to_string()], None).unwrap();

        let dest = dir.path().join("out/snap.json.gz");
        source.export(&snap.id, &dest).unwrap();

        let target = manager(no_limits());
        let id = target.import(&dest).unwrap();
        assert_eq!(id, snap.id);
        assert_eq!(target.load(&id).unwrap(), snap);
        assert_eq!(target.metadata(&id).tags, vec!["keep"]);

        assert!(target.import(&dest).is_err());
    }
}
