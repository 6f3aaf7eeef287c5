use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;

use crate::error::Result;
use crate::languages::LanguageRegistry;

/// Directories never descended into
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    ".svn",
    "dist",
    "build",
    "out",
    "coverage",
    ".next",
    ".nuxt",
    ".cache",
    ".turbo",
    "target",
    ".code-impact",
];

/// Ignore rules: a fixed directory set plus simple `.gitignore` patterns.
///
/// Patterns are matched with plain substring or `*`/`?` wildcard semantics,
/// not full gitignore globbing. Negations are skipped.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    dirs: Vec<String>,
    patterns: Vec<IgnorePattern>,
}

#[derive(Debug, Clone)]
enum IgnorePattern {
    Literal { text: String, dir_only: bool },
    Wildcard { pattern: glob::Pattern, dir_only: bool },
}

impl IgnoreRules {
    pub fn new(extra_dirs: &[String]) -> Self {
        let mut dirs: Vec<String> = DEFAULT_IGNORE_DIRS.iter().map(|d| d.to_string()).collect();
        dirs.extend(extra_dirs.iter().cloned());
        Self {
            dirs,
            patterns: Vec::new(),
        }
    }

    /// Adds the patterns of `<root>/.gitignore` when present
    pub fn with_gitignore(mut self, root: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(root.join(".gitignore")) {
            self.add_gitignore(&content);
        }
        self
    }

    pub fn add_gitignore(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let dir_only = line.ends_with('/');
            let text = line.trim_start_matches('/').trim_end_matches('/');
            if text.is_empty() {
                continue;
            }

            if text.contains('*') || text.contains('?') {
                match glob::Pattern::new(text) {
                    Ok(pattern) => self.patterns.push(IgnorePattern::Wildcard { pattern, dir_only }),
                    Err(e) => tracing::debug!("Skipping .gitignore pattern {:?}: {}", text, e),
                }
            } else {
                self.patterns.push(IgnorePattern::Literal {
                    text: text.to_string(),
                    dir_only,
                });
            }
        }
    }

    /// `rel_path` is project-relative with forward slashes
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);

        if is_dir && self.dirs.iter().any(|d| d == name) {
            return true;
        }
        if rel_path.split('/').any(|segment| self.dirs.iter().any(|d| d == segment)) {
            return true;
        }

        self.patterns.iter().any(|pattern| match pattern {
            IgnorePattern::Literal { text, dir_only } => {
                if *dir_only && !is_dir {
                    // a file under an ignored directory
                    rel_path.split('/').rev().skip(1).any(|segment| segment == text)
                } else if text.contains('/') {
                    rel_path == text || rel_path.starts_with(&format!("{}/", text))
                } else {
                    rel_path.split('/').any(|segment| segment == text)
                }
            }
            IgnorePattern::Wildcard { pattern, dir_only } => {
                if *dir_only && !is_dir {
                    return false;
                }
                pattern.matches(name) || pattern.matches(rel_path)
            }
        })
    }

    /// Whether a file is left out of tracking. The full walk and incremental
    /// updates both go through this: hidden components, ignored ancestor
    /// directories, then the file itself.
    pub fn excludes_file(&self, rel_path: &str) -> bool {
        let segments: Vec<&str> = rel_path.split('/').collect();
        if segments.iter().any(|s| s.starts_with('.')) {
            return true;
        }
        (1..segments.len()).any(|i| self.is_ignored(&segments[..i].join("/"), true))
            || self.is_ignored(rel_path, false)
    }
}

/// Project-relative path with forward slashes, or `None` outside `root`
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };

    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk entries carry `root` as a prefix, relative or not
fn under_root(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    relative_path(root, rel)
}

#[derive(Clone)]
pub struct FileWalker {
    registry: LanguageRegistry,
    rules: Arc<IgnoreRules>,
}

impl FileWalker {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self::with_rules(registry, IgnoreRules::new(&[]))
    }

    pub fn with_rules(registry: LanguageRegistry, rules: IgnoreRules) -> Self {
        Self {
            registry,
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    /// Tracked files under `root`, sorted
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let rules = Arc::clone(&self.rules);
        let filter_root = root.to_path_buf();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                match under_root(&filter_root, entry.path()) {
                    Some(rel) => !rules.is_ignored(&rel, is_dir),
                    None => true,
                }
            })
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if under_root(root, path).is_some_and(|rel| self.is_tracked(&rel)) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.registry.get_for_file(path).is_some()
    }

    /// Whether a project-relative path is tracked and not ignored
    pub fn is_tracked(&self, rel_path: &str) -> bool {
        self.is_supported(Path::new(rel_path)) && !self.rules.excludes_file(rel_path)
    }

    pub fn get_language(&self, path: &Path) -> Option<String> {
        self.registry.language_tag(path).map(|t| t.to_string())
    }
}
