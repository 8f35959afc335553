//! Build manifest recorded with every build cache entry
//!
//! The manifest names, relative to the original install prefix, the files
//! whose contents or link targets embed the install root. It is written at
//! packaging time, embedded in the archive and published next to it, then
//! read back on install to drive relocation without rescanning the tree.

use bindist_errors::{Error, RelocationError};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Current manifest format version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Directory inside a packaged tree holding bindist metadata
pub const METADATA_DIR: &str = ".bindist";

/// Archive member holding the manifest, relative to the tree
pub const MANIFEST_PATH: &str = ".bindist/manifest.toml";

fn default_format_version() -> u32 {
    MANIFEST_FORMAT_VERSION
}

/// Build manifest (`.bindist/manifest.toml` contents)
///
/// Unknown fields are ignored on read so older readers accept manifests
/// written by newer tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Absolute prefix the tree was built into
    pub original_prefix: PathBuf,
    /// Install root shared by all packages at build time; defaults to
    /// `original_prefix` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_root: Option<PathBuf>,
    /// Whether binaries were made loader-relative before archiving
    #[serde(default)]
    pub relative_rpaths: bool,
    #[serde(default)]
    pub relocate_textfiles: Vec<PathBuf>,
    #[serde(default)]
    pub relocate_links: Vec<PathBuf>,
    /// Derived at patch time, never persisted
    #[serde(skip)]
    pub relocate_binaries: Vec<PathBuf>,
}

impl BuildManifest {
    /// Create an empty manifest for a tree built at `original_prefix`
    ///
    /// # Errors
    ///
    /// Returns an error if either path is not absolute.
    pub fn new(original_prefix: impl Into<PathBuf>, original_root: impl Into<PathBuf>) -> Result<Self, Error> {
        let original_prefix = original_prefix.into();
        let original_root = original_root.into();
        for path in [&original_prefix, &original_root] {
            if !path.is_absolute() {
                return Err(RelocationError::NotAbsolute {
                    path: path.display().to_string(),
                }
                .into());
            }
        }

        Ok(Self {
            format_version: MANIFEST_FORMAT_VERSION,
            original_prefix,
            original_root: Some(original_root),
            relative_rpaths: false,
            relocate_textfiles: Vec::new(),
            relocate_links: Vec::new(),
            relocate_binaries: Vec::new(),
        })
    }

    /// The install root recorded at build time
    #[must_use]
    pub fn original_root(&self) -> &Path {
        self.original_root
            .as_deref()
            .unwrap_or(&self.original_prefix)
    }

    /// Record a text file that embeds the install root
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a plain relative path.
    pub fn add_textfile(&mut self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        validate_relative(&path)?;
        self.relocate_textfiles.push(path);
        Ok(())
    }

    /// Record a symlink whose target lies under the install root
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a plain relative path.
    pub fn add_link(&mut self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        validate_relative(&path)?;
        self.relocate_links.push(path);
        Ok(())
    }

    /// Record an object file with load paths
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a plain relative path.
    pub fn add_binary(&mut self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        validate_relative(&path)?;
        self.relocate_binaries.push(path);
        Ok(())
    }

    /// Sort every list so the serialized form does not depend on walk order
    pub fn sort(&mut self) {
        self.relocate_textfiles.sort();
        self.relocate_links.sort();
        self.relocate_binaries.sort();
    }

    /// Validate manifest fields
    ///
    /// # Errors
    ///
    /// Returns an error if a recorded prefix is relative, if any listed path
    /// is absolute or climbs out of the prefix, or if the format version is
    /// newer than this reader understands.
    pub fn validate(&self) -> Result<(), Error> {
        if self.format_version > MANIFEST_FORMAT_VERSION {
            return Err(RelocationError::InvalidManifestEntry {
                path: "format_version".to_string(),
                reason: format!(
                    "manifest format {} is newer than supported format {MANIFEST_FORMAT_VERSION}",
                    self.format_version
                ),
            }
            .into());
        }

        if !self.original_prefix.is_absolute() {
            return Err(RelocationError::NotAbsolute {
                path: self.original_prefix.display().to_string(),
            }
            .into());
        }
        if !self.original_root().is_absolute() {
            return Err(RelocationError::NotAbsolute {
                path: self.original_root().display().to_string(),
            }
            .into());
        }

        self.relocate_textfiles
            .iter()
            .chain(&self.relocate_links)
            .chain(&self.relocate_binaries)
            .try_for_each(|path| validate_relative(path))
    }

    /// Serialize to TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized to TOML format.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load and validate a manifest from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the manifest fails
    /// [`BuildManifest::validate`].
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Reject absolute paths and parent-directory components
fn validate_relative(path: &Path) -> Result<(), Error> {
    let reason = if path.as_os_str().is_empty() {
        Some("empty path")
    } else if path.is_absolute() || path.has_root() {
        Some("absolute paths are not allowed")
    } else if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        Some("path escapes the install prefix")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RelocationError::InvalidManifestEntry {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_relative_lists() {
        let mut manifest = BuildManifest::new("/opt/spack/zlib-1.2", "/opt/spack").unwrap();
        manifest.add_textfile("dummy.txt").unwrap();
        manifest.add_link("link_to_dummy.txt").unwrap();
        manifest.add_binary("lib/libz.so").unwrap();

        let toml = manifest.to_toml().unwrap();
        assert!(toml.contains("original_prefix = \"/opt/spack/zlib-1.2\""));
        assert!(toml.contains("dummy.txt"));
        assert!(!toml.contains("libz.so"), "binaries are never persisted");

        let parsed = BuildManifest::from_toml(&toml).unwrap();
        assert_eq!(parsed.relocate_textfiles, vec![PathBuf::from("dummy.txt")]);
        assert_eq!(parsed.relocate_links, vec![PathBuf::from("link_to_dummy.txt")]);
        assert!(parsed.relocate_binaries.is_empty());
        assert_eq!(parsed.original_root(), Path::new("/opt/spack"));
    }

    #[test]
    fn rejects_absolute_and_escaping_entries() {
        let mut manifest = BuildManifest::new("/opt/pkg", "/opt").unwrap();
        assert!(manifest.add_textfile("/etc/passwd").is_err());
        assert!(manifest.add_link("../outside").is_err());
        assert!(manifest.add_binary("").is_err());
        assert!(manifest.add_textfile("share/doc/../README").is_err());
        assert!(BuildManifest::new("relative/prefix", "/opt").is_err());
    }

    #[test]
    fn ignores_unknown_fields_and_defaults_missing_ones() {
        let content = r#"
original_prefix = "/home/spack/opt/spack/pkg"
relocate_textfiles = ["bin/script"]
relocate_links = []
buildpath = "/tmp/stage"
some_future_field = { nested = true }
"#;
        let manifest = BuildManifest::from_toml(content).unwrap();
        assert_eq!(manifest.format_version, MANIFEST_FORMAT_VERSION);
        assert!(!manifest.relative_rpaths);
        assert_eq!(manifest.original_root(), Path::new("/home/spack/opt/spack/pkg"));
        assert_eq!(manifest.relocate_textfiles, vec![PathBuf::from("bin/script")]);
    }

    #[test]
    fn rejects_leaked_absolute_path_on_read() {
        let content = r#"
original_prefix = "/opt/pkg"
relocate_textfiles = ["/opt/pkg/bin/script"]
"#;
        assert!(BuildManifest::from_toml(content).is_err());
    }

    #[test]
    fn rejects_newer_format() {
        let content = r#"
format_version = 99
original_prefix = "/opt/pkg"
"#;
        assert!(BuildManifest::from_toml(content).is_err());
    }
}
