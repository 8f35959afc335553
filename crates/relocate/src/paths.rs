//! Lexical path arithmetic
//!
//! Nothing here touches the filesystem. Install roots recorded at build
//! time usually do not exist on the machine doing the rewriting.

use bindist_errors::RelocationError;
use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components without consulting the filesystem
///
/// Returns `None` for relative paths and for paths whose `..` components
/// climb above `/`.
#[must_use]
pub fn normalize(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    Some(out)
}

/// Whether `path` is `root` or lies beneath it, compared by component
#[must_use]
pub fn is_under(path: &Path, root: &Path) -> bool {
    match (normalize(path), normalize(root)) {
        (Some(path), Some(root)) => path.starts_with(root),
        _ => false,
    }
}

/// Relative path from directory `from` to `to`
///
/// `..` segments are counted exactly to the deepest common ancestor; an
/// empty result is returned as `.`.
///
/// # Errors
///
/// Returns `NotAbsolute` if either path is relative and `PathEscapesRoot`
/// if either path climbs above `/`.
pub fn relative_to(from: &Path, to: &Path) -> Result<PathBuf, RelocationError> {
    for path in [from, to] {
        if !path.is_absolute() {
            return Err(RelocationError::NotAbsolute {
                path: path.display().to_string(),
            });
        }
    }
    let escapes = || RelocationError::PathEscapesRoot {
        path: to.display().to_string(),
        base: from.display().to_string(),
    };
    let from = normalize(from).ok_or_else(escapes)?;
    let to = normalize(to).ok_or_else(escapes)?;

    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from_parts.len() {
        relative.push("..");
    }
    for part in &to_parts[common..] {
        relative.push(part.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Ok(relative)
}

/// Encode `to` relative to directory `from_dir` behind a loader token such
/// as `$ORIGIN` or `@loader_path`
///
/// # Errors
///
/// See [`relative_to`].
pub fn loader_relative(token: &str, from_dir: &Path, to: &Path) -> Result<String, RelocationError> {
    let relative = relative_to(from_dir, to)?;
    if relative == Path::new(".") {
        Ok(token.to_string())
    } else {
        Ok(format!("{token}/{}", relative.display()))
    }
}

fn trim_separator(s: &str) -> &str {
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && s.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Replace the leading `old` of `entry` with `new`
///
/// Matches whole components only: `/usr2/lib` is not under `/usr`. Returns
/// `None` when `entry` is not under `old`.
#[must_use]
pub fn replace_prefix(entry: &str, old: &str, new: &str) -> Option<String> {
    let old = trim_separator(old);
    let new = trim_separator(new);
    if entry == old {
        return Some(new.to_string());
    }
    let rest = if old == "/" {
        entry.strip_prefix('/')?
    } else {
        entry.strip_prefix(old)?.strip_prefix('/')?
    };
    if new == "/" {
        Some(format!("/{rest}"))
    } else {
        Some(format!("{new}/{rest}"))
    }
}

/// Ordered old → new prefix substitutions
///
/// The first pair whose old prefix matches wins, so more specific prefixes
/// go first. Pairs are kept verbatim for byte substitution in text files
/// and trimmed of trailing separators for path matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMap {
    pairs: Vec<(String, String)>,
}

impl PrefixMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(old: impl AsRef<Path>, new: impl AsRef<Path>) -> Self {
        Self::new().with(old, new)
    }

    /// Append a pair; empty or repeated old prefixes and identical pairs are
    /// dropped
    #[must_use]
    pub fn with(mut self, old: impl AsRef<Path>, new: impl AsRef<Path>) -> Self {
        let old = old.as_ref().to_string_lossy().into_owned();
        let new = new.as_ref().to_string_lossy().into_owned();
        if !old.is_empty() && old != new && !self.pairs.iter().any(|(existing, _)| *existing == old) {
            self.pairs.push((old, new));
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(old, new)| (old.as_str(), new.as_str()))
    }

    /// Map one path string; `None` if no pair applies
    #[must_use]
    pub fn map_str(&self, entry: &str) -> Option<String> {
        self.pairs
            .iter()
            .find_map(|(old, new)| replace_prefix(entry, old, new))
    }

    #[must_use]
    pub fn map_path(&self, path: &Path) -> Option<PathBuf> {
        self.map_str(&path.to_string_lossy()).map(PathBuf::from)
    }

    /// Map every entry, passing through those no pair applies to
    #[must_use]
    pub fn map_all(&self, entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| self.map_str(entry).unwrap_or_else(|| entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_lexical() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), Some(PathBuf::from("/a/c")));
        assert_eq!(normalize(Path::new("/..")), None);
        assert_eq!(normalize(Path::new("relative")), None);
    }

    #[test]
    fn relative_counts_to_common_ancestor() {
        let rel = |from: &str, to: &str| relative_to(Path::new(from), Path::new(to)).unwrap();
        assert_eq!(rel("/usr/bin", "/usr/lib"), PathBuf::from("../lib"));
        assert_eq!(rel("/usr/bin", "/usr/bin"), PathBuf::from("."));
        assert_eq!(rel("/usr", "/usr/lib/x"), PathBuf::from("lib/x"));
        assert_eq!(
            rel("/Users/Shares/spack/pkgC/lib", "/Users/Shared/spack/pkgA/lib"),
            PathBuf::from("../../../../Shared/spack/pkgA/lib")
        );
        assert_eq!(rel("/a/b", "/"), PathBuf::from("../.."));
    }

    #[test]
    fn relative_rejects_escapes() {
        assert!(matches!(
            relative_to(Path::new("/usr/bin"), Path::new("/usr/../../lib")),
            Err(RelocationError::PathEscapesRoot { .. })
        ));
        assert!(matches!(
            relative_to(Path::new("usr/bin"), Path::new("/usr/lib")),
            Err(RelocationError::NotAbsolute { .. })
        ));
    }

    #[test]
    fn prefix_replacement_matches_components() {
        assert_eq!(replace_prefix("/usr/lib", "/usr", "/opt").as_deref(), Some("/opt/lib"));
        assert_eq!(replace_prefix("/usr", "/usr/", "/opt").as_deref(), Some("/opt"));
        assert_eq!(replace_prefix("/usr2/lib", "/usr", "/opt"), None);
        assert_eq!(replace_prefix("$ORIGIN/../lib", "/usr", "/opt"), None);
        assert_eq!(replace_prefix("/lib", "/", "/sysroot").as_deref(), Some("/sysroot/lib"));
        assert_eq!(replace_prefix("/sysroot/lib", "/sysroot", "/").as_deref(), Some("/lib"));
    }

    #[test]
    fn prefix_map_first_match_wins() {
        let map = PrefixMap::single("/old/root/pkg-abc", "/new/root/pkg-xyz")
            .with("/old/root", "/new/root")
            .with("/same", "/same");
        assert_eq!(map.pairs().count(), 2);
        assert_eq!(
            map.map_str("/old/root/pkg-abc/lib").as_deref(),
            Some("/new/root/pkg-xyz/lib")
        );
        assert_eq!(map.map_str("/old/root/dep/lib").as_deref(), Some("/new/root/dep/lib"));
        assert_eq!(map.map_str("/usr/lib"), None);
        assert_eq!(
            map.map_all(&["/old/root/x".into(), "/usr/lib".into()]),
            vec!["/new/root/x".to_string(), "/usr/lib".to_string()]
        );
    }
}
