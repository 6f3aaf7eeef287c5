pub mod fs;
pub mod memory;
pub mod models;

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ImpactError, Result};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use models::*;

/// Key -> blob persistence used by every component.
///
/// Keys are `/`-separated relative paths such as `index/files.json`. Each
/// `put` replaces the whole blob; there are no partial writes.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    /// Keys under a prefix, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
    /// Returns whether the key existed
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Storage layout
pub mod keys {
    pub const HASHES: &str = "index/hashes.json";
    pub const FILES: &str = "index/files.json";
    pub const MTIME_CACHE: &str = "index/mtime-cache.json";
    pub const AST_PREFIX: &str = "index/ast/";
    pub const GRAPH: &str = "index/deps/graph.json";
    pub const SNAPSHOT_PREFIX: &str = "history/snapshots/";
    pub const METADATA_PREFIX: &str = "history/metadata/";
    pub const AI_REPORTS: &str = "reports/ai-analysis.json";

    pub fn ast(path: &str) -> String {
        format!("{}{}.json", AST_PREFIX, sanitize_path(path))
    }

    pub fn snapshot(id: &str, compressed: bool) -> String {
        if compressed {
            format!("{}{}.json.gz", SNAPSHOT_PREFIX, id)
        } else {
            format!("{}{}.json", SNAPSHOT_PREFIX, id)
        }
    }

    pub fn metadata(id: &str) -> String {
        format!("{}{}.json", METADATA_PREFIX, id)
    }

    /// Flattens a project path into a single file name.
    ///
    /// `/` becomes `~`; `~`, `%` and characters unsafe in file names are
    /// percent-escaped, so distinct paths never share a key.
    pub fn sanitize_path(path: &str) -> String {
        let mut out = String::with_capacity(path.len());
        for c in path.chars() {
            match c {
                '/' => out.push('~'),
                '~' | '%' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                    out.push_str(&format!("%{:02X}", c as u32));
                }
                c => out.push(c),
            }
        }
        out
    }
}

/// Reads and decodes a JSON blob.
///
/// Missing keys and undecodable content both read as `None`; corruption is
/// logged and the caller falls back to "no prior data".
pub fn read_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Option<T> {
    let bytes = match store.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", key, e);
            return None;
        }
    };

    let bytes = if key.ends_with(".gz") {
        match gunzip(&bytes) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed to decompress {}: {}", key, e);
                return None;
            }
        }
    } else {
        bytes
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring corrupt {}: {}", key, e);
            None
        }
    }
}

/// Encodes a value as JSON, gzip-compressing when the key ends in `.gz`
pub fn write_json<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if key.ends_with(".gz") {
        store.put(key, &gzip(&bytes)?)
    } else {
        store.put(key, &bytes)
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ImpactError::Storage(format!("gzip decode failed: {}", e)))?;
    Ok(out)
}
