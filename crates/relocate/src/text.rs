//! Install root substitution in text files and symlink targets

use bindist_errors::Error;
use bindist_platform::fs::{replace_symlink, write_preserving_permissions};
use bstr::ByteSlice;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::paths::PrefixMap;
use crate::report::RelocationReport;

fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

/// Replace every occurrence of each pair's old string in one pass
///
/// At a given offset the first matching pair wins, and replaced text is
/// never scanned again. Returns `None` when nothing matched.
fn substitute(data: &[u8], map: &PrefixMap) -> Option<Vec<u8>> {
    let pairs: Vec<(&[u8], &[u8])> = map
        .pairs()
        .map(|(old, new)| (old.as_bytes(), new.as_bytes()))
        .filter(|(old, _)| !old.is_empty())
        .collect();

    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    let mut changed = false;
    loop {
        let next = pairs
            .iter()
            .enumerate()
            .filter_map(|(index, (old, _))| rest.find(old).map(|pos| (pos, index)))
            .min();
        let Some((pos, index)) = next else {
            out.extend_from_slice(rest);
            break;
        };
        let (old, new) = pairs[index];
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(new);
        rest = &rest[pos + old.len()..];
        changed = true;
    }
    changed.then_some(out)
}

async fn relocate_text_file(path: &Path, map: &PrefixMap) -> Result<bool, Error> {
    let data = fs::read(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    let Some(patched) = substitute(&data, map) else {
        return Ok(false);
    };
    write_preserving_permissions(path, &patched)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    Ok(true)
}

/// Substitute install paths in text files
///
/// `old_path` becomes `new_path`; where they differ, the remaining
/// occurrences of `old_prefix` become `new_prefix`. Matching is by exact
/// substring, so paths embedded in shebangs or quoted strings are found
/// too. Permission bits are kept.
pub async fn relocate_text(
    files: &[PathBuf],
    old_path: &Path,
    new_path: &Path,
    old_prefix: &Path,
    new_prefix: &Path,
) -> RelocationReport {
    let map = PrefixMap::single(old_path, new_path).with(old_prefix, new_prefix);
    relocate_text_with(files, &map).await
}

/// [`relocate_text`] over an ordered set of substitutions
pub async fn relocate_text_with(files: &[PathBuf], map: &PrefixMap) -> RelocationReport {
    let mut report = RelocationReport::default();
    for file in files {
        match relocate_text_file(file, map).await {
            Ok(true) => report.record_relocated(file),
            Ok(false) => {}
            Err(e) => report.record_failure(file, e),
        }
    }
    report
}

async fn relocate_link(link: &Path, map: &PrefixMap) -> Result<bool, Error> {
    let target = fs::read_link(link)
        .await
        .map_err(|e| Error::io_with_path(&e, link))?;
    if !target.is_absolute() {
        return Ok(false);
    }
    let Some(new_target) = map.map_path(&target) else {
        return Ok(false);
    };
    if new_target == target {
        return Ok(false);
    }
    replace_symlink(link, &new_target).map_err(|e| Error::io_with_path(&e, link))?;
    Ok(true)
}

/// Point absolute symlinks under `old_root` at the same suffix under
/// `new_root`
///
/// Each link is removed and recreated. Relative links and links outside
/// `old_root` are left alone.
pub async fn relocate_links(files: &[PathBuf], old_root: &Path, new_root: &Path) -> RelocationReport {
    relocate_links_with(files, &PrefixMap::single(old_root, new_root)).await
}

/// [`relocate_links`] over an ordered set of substitutions
pub async fn relocate_links_with(files: &[PathBuf], map: &PrefixMap) -> RelocationReport {
    let mut report = RelocationReport::default();
    for link in files {
        match relocate_link(link, map).await {
            Ok(true) => report.record_relocated(link),
            Ok(false) => {}
            Err(e) => report.record_failure(link, e),
        }
    }
    report
}

/// Whether `data` mentions `root` outside any occurrence of the `allowed`
/// strings
///
/// A new install root may contain the old one (`/opt/sw` and
/// `/opt/sw2`); such occurrences are not stale.
#[must_use]
pub fn contains_stale_root(data: &[u8], root: &[u8], allowed: &[&[u8]]) -> bool {
    if root.is_empty() {
        return false;
    }
    data.find_iter(root).any(|pos| {
        !allowed.iter().any(|outer| {
            outer.find_iter(root).any(|offset| {
                pos >= offset && data[pos - offset..].starts_with(outer)
            })
        })
    })
}

/// Literal scan of `file` for `root`
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn contains_install_root(file: &Path, root: &Path) -> Result<bool, Error> {
    let data = fs::read(file)
        .await
        .map_err(|e| Error::io_with_path(&e, file))?;
    Ok(contains_stale_root(&data, path_bytes(root), &[]))
}

/// Like [`contains_install_root`], ignoring occurrences inside `allowed`
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn contains_stale_install_root(
    file: &Path,
    root: &Path,
    allowed: &[PathBuf],
) -> Result<bool, Error> {
    let data = fs::read(file)
        .await
        .map_err(|e| Error::io_with_path(&e, file))?;
    let allowed: Vec<&[u8]> = allowed.iter().map(|p| path_bytes(p)).collect();
    Ok(contains_stale_root(&data, path_bytes(root), &allowed))
}
