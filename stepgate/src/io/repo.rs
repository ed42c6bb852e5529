//! Read-only access to the job's repository.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::allowlist::normalize_path;

/// A repository root that file and glob lookups resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a repository-relative path onto the root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(normalize_path(relative))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).exists()
    }

    pub fn read_to_string(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Expand a repository-relative glob, returning matches relative to the root.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let root = self
            .root
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 repository root {}", self.root.display()))?;
        let absolute = format!(
            "{}/{}",
            glob::Pattern::escape(root.trim_end_matches(['/', '\\'])),
            normalize_path(pattern)
        );
        let mut matches = Vec::new();
        for entry in glob::glob(&absolute).with_context(|| format!("invalid glob {pattern}"))? {
            let path = entry.context("read glob entry")?;
            let relative = path.strip_prefix(&self.root).unwrap_or(&path);
            matches.push(normalize_path(&relative.to_string_lossy()));
        }
        matches.sort();
        debug!(pattern, matches = matches.len(), "expanded glob");
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Repo) {
        let temp = tempfile::tempdir().expect("tempdir");
        for (path, contents) in files {
            let full = temp.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(full, contents).expect("write");
        }
        let repo = Repo::new(temp.path());
        (temp, repo)
    }

    #[test]
    fn resolves_relative_paths() {
        let (_temp, repo) = repo_with(&[("src/lib.rs", "pub fn f() {}")]);
        assert!(repo.exists("src/lib.rs"));
        assert!(repo.exists("./src/lib.rs"));
        assert!(!repo.exists("src/main.rs"));
        assert_eq!(repo.read_to_string("src/lib.rs").expect("read"), "pub fn f() {}");
    }

    #[test]
    fn glob_returns_sorted_relative_matches() {
        let (_temp, repo) = repo_with(&[
            ("src/b.rs", ""),
            ("src/a.rs", ""),
            ("docs/readme.md", ""),
        ]);
        assert_eq!(repo.glob("src/*.rs").expect("glob"), vec!["src/a.rs", "src/b.rs"]);
        assert!(repo.glob("tests/*.rs").expect("glob").is_empty());
    }

    #[test]
    fn read_missing_file_errors_with_path() {
        let (_temp, repo) = repo_with(&[]);
        let err = repo.read_to_string("nope.txt").expect_err("missing");
        assert!(err.to_string().contains("nope.txt"));
    }
}
