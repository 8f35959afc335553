//! ELF search path computation and rewriting

use bindist_errors::{Error, RelocationError};
use bindist_platform::ElfRewriter;
use bindist_types::{ElfPaths, RPathSet};
use std::path::Path;

use crate::paths::{is_under, loader_relative, PrefixMap};

/// Loader token for the directory containing the object
pub const ORIGIN: &str = "$ORIGIN";

fn parent_dir(binary_path: &Path) -> Result<&Path, RelocationError> {
    binary_path.parent().ok_or_else(|| RelocationError::NotAbsolute {
        path: binary_path.display().to_string(),
    })
}

/// Make every absolute entry under `root` relative to the binary's directory
///
/// Entries outside `root` and entries already using a loader token pass
/// through unchanged.
///
/// # Errors
///
/// Returns `PathEscapesRoot` if an entry cannot be expressed relative to
/// the binary, and `NotAbsolute` if `binary_path` is relative.
pub fn compute_relative_rpaths(
    binary_path: &Path,
    root: &Path,
    rpaths: &[String],
) -> Result<RPathSet, RelocationError> {
    let dir = parent_dir(binary_path)?;
    rpaths
        .iter()
        .map(|entry| {
            let path = Path::new(entry);
            if path.is_absolute() && is_under(path, root) {
                loader_relative(ORIGIN, dir, path)
            } else {
                Ok(entry.clone())
            }
        })
        .collect()
}

/// Replace `old_root` with `new_root` in every entry under it
#[must_use]
pub fn substitute_prefix(rpaths: &[String], old_root: &Path, new_root: &Path) -> RPathSet {
    PrefixMap::single(old_root, new_root).map_all(rpaths)
}

/// Read the search paths of `binary_path`
///
/// # Errors
///
/// Returns `BinaryFormat` if the file is not ELF.
pub async fn get_paths(rewriter: &ElfRewriter, binary_path: &Path) -> Result<ElfPaths, Error> {
    Ok(rewriter.read_paths(binary_path).await?)
}

/// Rewrite the search paths of `binary_path` from `old` to `new_rpaths`
///
/// Returns whether the file changed. The tag (`DT_RPATH` or `DT_RUNPATH`)
/// is kept.
///
/// # Errors
///
/// Returns `BinaryFormat` if the new entries do not fit or the entry count
/// differs, and `ToolUnavailable` if the backend's helper is missing.
pub async fn apply(
    rewriter: &ElfRewriter,
    binary_path: &Path,
    old: &ElfPaths,
    new_rpaths: RPathSet,
) -> Result<bool, Error> {
    if old.rpaths == new_rpaths {
        return Ok(false);
    }
    let new = ElfPaths::new(new_rpaths, old.tag);
    rewriter.write_paths(binary_path, old, &new).await?;
    Ok(true)
}
