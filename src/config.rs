//! Engine configuration.
//!
//! Loaded from `<root>/.code-impact.toml` when present. Every field has a
//! default so a partial file only overrides what it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};

pub const CONFIG_FILENAME: &str = ".code-impact.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    /// Fast non-cryptographic mode
    Xxh3,
}

/// Heat multipliers per dependent tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactWeights {
    pub direct: f64,
    pub circular: f64,
    pub transitive: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            direct: 1.0,
            circular: 0.8,
            transitive: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_count: Option<usize>,
    pub max_age_days: Option<i64>,
    pub keep_tagged: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_count: Some(50),
            max_age_days: Some(30),
            keep_tagged: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage directory, relative to the project root unless absolute
    pub storage_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    /// Directories skipped in addition to the built-in set
    pub ignore_dirs: Vec<String>,
    pub impact_weights: ImpactWeights,
    pub cluster_min_size: usize,
    /// Risk points per edit in the declaration-sequence distance
    pub control_flow_edit_weight: u32,
    pub retention: RetentionConfig,
    pub compress_after_hours: i64,
    pub max_traversal_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".code-impact"),
            hash_algorithm: HashAlgorithm::default(),
            ignore_dirs: Vec::new(),
            impact_weights: ImpactWeights::default(),
            cluster_min_size: 2,
            control_flow_edit_weight: 10,
            retention: RetentionConfig::default(),
            compress_after_hours: 24,
            max_traversal_depth: 64,
        }
    }
}

impl EngineConfig {
    /// Loads `.code-impact.toml` from the project root, falling back to defaults
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILENAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ImpactError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn storage_path(&self, root: &Path) -> PathBuf {
        if self.storage_dir.is_absolute() {
            self.storage_dir.clone()
        } else {
            root.join(&self.storage_dir)
        }
    }
}
