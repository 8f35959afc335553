//! Package identity and installed trees

use bindist_errors::{CacheError, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Length of the truncated hash used as a human-typable key
pub const SHORT_HASH_LEN: usize = 7;

/// Stable identity of a concretized package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub dag_hash: String,
}

impl PackageId {
    /// Create a new package ID
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        dag_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dag_hash: dag_hash.into(),
        }
    }

    /// The first seven characters of the dependency hash
    #[must_use]
    pub fn short_hash(&self) -> &str {
        let end = self
            .dag_hash
            .char_indices()
            .nth(SHORT_HASH_LEN)
            .map_or(self.dag_hash.len(), |(idx, _)| idx);
        &self.dag_hash[..end]
    }

    /// Archive key used on mirrors
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.dag_hash)
    }

    /// Check that the key can name a single directory under a store root
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntry` if a field is empty, is `.` or `..`, or
    /// contains a path separator or NUL.
    pub fn validate(&self) -> Result<(), Error> {
        let fields = [
            ("name", &self.name),
            ("version", &self.version),
            ("hash", &self.dag_hash),
        ];
        for (field, value) in fields {
            let reason = if value.is_empty() {
                "is empty"
            } else if value == "." || value == ".." {
                "is a relative path component"
            } else if value.contains(['/', '\\', '\0']) {
                "contains a path separator"
            } else {
                continue;
            };
            return Err(CacheError::InvalidEntry {
                key: self.key(),
                message: format!("{field} {reason}"),
            }
            .into());
        }
        Ok(())
    }

    /// Whether `query` selects this package.
    ///
    /// Accepted forms are `/<hash prefix>`, `<name>`, `<name>@<version>`,
    /// `<name>@<version>/<hash prefix>` and the full archive key.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        if query == self.key() {
            return true;
        }

        let (spec, hash) = match query.split_once('/') {
            Some((spec, hash)) => (spec, Some(hash)),
            None => (query, None),
        };

        if let Some(hash) = hash {
            if hash.is_empty() || !self.dag_hash.starts_with(hash) {
                return false;
            }
        }

        if spec.is_empty() {
            return hash.is_some();
        }

        match spec.split_once('@') {
            Some((name, version)) => name == self.name && version == self.version,
            None => spec == self.name,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.version, self.short_hash())
    }
}

/// An installed package tree
///
/// `root` is the install root shared by every package; `prefix` is this
/// package's directory beneath it. Both are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTree {
    pub id: PackageId,
    pub prefix: PathBuf,
    pub root: PathBuf,
}

impl InstallTree {
    pub fn new(id: PackageId, prefix: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            prefix: prefix.into(),
            root: root.into(),
        }
    }
}
