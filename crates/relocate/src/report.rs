//! Outcome of relocating a tree

use bindist_errors::Error;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A file that could not be relocated
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// Files rewritten and files that failed during one relocation
///
/// Per-file errors are collected here instead of aborting the tree.
#[derive(Debug, Clone, Default)]
pub struct RelocationReport {
    pub relocated: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    /// Locations the tree now refers to; references inside them are not
    /// stale even when they contain the old root as a substring
    pub new_roots: Vec<PathBuf>,
}

impl RelocationReport {
    pub fn record_relocated(&mut self, path: impl Into<PathBuf>) {
        self.relocated.push(path.into());
    }

    pub fn record_failure(&mut self, path: impl Into<PathBuf>, error: Error) {
        self.failures.push(FileFailure {
            path: path.into(),
            error,
        });
    }

    /// Fold the file lists of `other` into this report
    pub fn merge(&mut self, other: RelocationReport) {
        self.relocated.extend(other.relocated);
        self.failures.extend(other.failures);
        for root in other.new_roots {
            if !self.new_roots.contains(&root) {
                self.new_roots.push(root);
            }
        }
    }

    /// Sort file lists so reports do not depend on task completion order
    pub fn sort(&mut self) {
        self.relocated.sort();
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failed_paths(&self) -> HashSet<&Path> {
        self.failures.iter().map(|f| f.path.as_path()).collect()
    }

    /// Paths of files left unrelocated
    #[must_use]
    pub fn unrelocated(&self) -> Vec<PathBuf> {
        self.failures.iter().map(|f| f.path.clone()).collect()
    }
}
