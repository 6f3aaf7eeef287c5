//! Read-only view of the enclosing git repository.
//!
//! Everything here shells out to the `git` binary. Nothing in the analysis
//! pipeline depends on it for correctness; callers treat failures as "no
//! information".

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};
use crate::index::CommitInfo;

pub struct GitIntegration {
    repo_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeStatus {
    pub fn from_git_status(status: &str) -> Option<Self> {
        match status.chars().next()? {
            'A' | '?' => Some(ChangeStatus::Added),
            'D' => Some(ChangeStatus::Deleted),
            'R' => Some(ChangeStatus::Renamed),
            _ => Some(ChangeStatus::Modified),
        }
    }

    fn from_porcelain(code: &str) -> Self {
        if code.starts_with('A') || code.ends_with('A') || code.starts_with('?') {
            ChangeStatus::Added
        } else if code.starts_with('D') || code.ends_with('D') {
            ChangeStatus::Deleted
        } else if code.starts_with('R') {
            ChangeStatus::Renamed
        } else {
            ChangeStatus::Modified
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Renamed => "renamed",
        }
    }
}

impl GitIntegration {
    /// Fails with [`ImpactError::Git`] when `repo_path` is not inside a work tree
    pub fn open(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let git = Self { repo_path };

        let inside = git.run(&["rev-parse", "--is-inside-work-tree"])?;
        if inside.trim() != "true" {
            return Err(ImpactError::Git("Not a git repository".to_string()));
        }
        Ok(git)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Work tree root; changed-file paths are relative to it
    pub fn toplevel(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.run(&["rev-parse", "--show-toplevel"])?.trim()))
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| ImpactError::Git(format!("Failed to run git {}: {}", args[0], e)))?;

        if !output.status.success() {
            return Err(ImpactError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Files changed against `base`, or every uncommitted change when `base` is `None`
    pub fn changed_files(&self, base: Option<&str>) -> Result<Vec<ChangedFile>> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();

        match base {
            Some(base) => {
                let stdout = self.run(&["diff", "--name-status", base])?;
                for line in stdout.lines() {
                    if let Some((status, path)) = parse_name_status(line) {
                        if seen.insert(path.clone()) {
                            files.push(ChangedFile { path, status });
                        }
                    }
                }
                let untracked = self.run(&["ls-files", "--full-name", "--others", "--exclude-standard"])?;
                for line in untracked.lines() {
                    let path = line.trim().to_string();
                    if !path.is_empty() && seen.insert(path.clone()) {
                        files.push(ChangedFile {
                            path,
                            status: ChangeStatus::Added,
                        });
                    }
                }
            }
            None => {
                let stdout = self.run(&["status", "--porcelain", "--untracked-files=all"])?;
                for line in stdout.lines() {
                    if let Some((status, path)) = parse_porcelain(line) {
                        if seen.insert(path.clone()) {
                            files.push(ChangedFile { path, status });
                        }
                    }
                }
            }
        }

        Ok(files)
    }

    /// Unified diff text for one file against `base` (defaults to `HEAD`)
    pub fn file_diff(&self, file_path: &str, base: Option<&str>) -> Result<String> {
        self.run(&["diff", base.unwrap_or("HEAD"), "--", file_path])
    }

    pub fn head_commit(&self) -> Result<CommitInfo> {
        let stdout = self.run(&["log", "-1", "--format=%H%x1f%an%x1f%at%x1f%s"])?;
        parse_commit_line(stdout.trim())
            .ok_or_else(|| ImpactError::Git("Unexpected git log output".to_string()))
    }
}

fn parse_name_status(line: &str) -> Option<(ChangeStatus, String)> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 2 {
        return None;
    }
    let status = ChangeStatus::from_git_status(parts[0])?;
    let path = parts.last()?.trim().to_string();
    Some((status, path))
}

fn parse_porcelain(line: &str) -> Option<(ChangeStatus, String)> {
    if line.len() <= 3 {
        return None;
    }
    let code = line.get(0..2)?;
    let mut path = line.get(3..)?.trim();
    // renames read "old -> new"
    if let Some((_, new)) = path.split_once(" -> ") {
        path = new;
    }
    Some((ChangeStatus::from_porcelain(code), path.to_string()))
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut fields = line.split('\u{1f}');
    let hash = fields.next()?.to_string();
    let author = fields.next()?.to_string();
    let timestamp = fields.next()?.parse().ok()?;
    let message = fields.next().unwrap_or_default().to_string();
    if hash.is_empty() {
        return None;
    }
    Some(CommitInfo {
        hash,
        message,
        author,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_status_from_git_status() {
        assert_eq!(ChangeStatus::from_git_status("A"), Some(ChangeStatus::Added));
        assert_eq!(ChangeStatus::from_git_status("M"), Some(ChangeStatus::Modified));
        assert_eq!(ChangeStatus::from_git_status("D"), Some(ChangeStatus::Deleted));
        assert_eq!(ChangeStatus::from_git_status("R100"), Some(ChangeStatus::Renamed));
        assert_eq!(ChangeStatus::from_git_status("?"), Some(ChangeStatus::Added));
        assert_eq!(ChangeStatus::from_git_status(""), None);
    }

    #[test]
    fn test_parse_name_status() {
        let (status, path) = parse_name_status("M\tsrc/util.ts").unwrap();
        assert_eq!(status, ChangeStatus::Modified);
        assert_eq!(path, "src/util.ts");

        let (status, path) = parse_name_status("R087\tsrc/old.ts\tsrc/new.ts").unwrap();
        assert_eq!(status, ChangeStatus::Renamed);
        assert_eq!(path, "src/new.ts");

        assert!(parse_name_status("garbage").is_none());
    }

    #[test]
    fn test_parse_porcelain() {
        assert_eq!(
            parse_porcelain(" M src/a.ts"),
            Some((ChangeStatus::Modified, "src/a.ts".to_string()))
        );
        assert_eq!(
            parse_porcelain("?? src/new file.ts"),
            Some((ChangeStatus::Added, "src/new file.ts".to_string()))
        );
        assert_eq!(
            parse_porcelain("R  a.ts -> b.ts"),
            Some((ChangeStatus::Renamed, "b.ts".to_string()))
        );
        assert!(parse_porcelain("M").is_none());
    }

    #[test]
    fn test_parse_commit_line() {
        let commit = parse_commit_line("abc123\u{1f}Ada\u{1f}1700000000\u{1f}Fix: thing").unwrap();
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author, "Ada");
        assert_eq!(commit.timestamp, 1_700_000_000);
        assert_eq!(commit.message, "Fix: thing");
        assert!(parse_commit_line("").is_none());
    }

    #[test]
    fn test_open_outside_repository() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(GitIntegration::open(temp_dir.path()).is_err());
    }
}
