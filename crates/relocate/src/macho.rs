//! Mach-O load path computation and rewriting

use bindist_errors::{Error, RelocationError};
use bindist_platform::MachORewriter;
use bindist_types::MachOPaths;
use std::path::Path;

use crate::paths::{is_under, loader_relative, PrefixMap};

/// Loader token for the directory containing the object
pub const LOADER_PATH: &str = "@loader_path";

/// Prefix of install names resolved through `LC_RPATH`
pub const RPATH: &str = "@rpath";

fn rpath_name(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned());
    format!("{RPATH}/{name}")
}

/// Read the rpaths, dependencies and install name of `binary_path`
///
/// Fat files report the paths of their first slice.
///
/// # Errors
///
/// Returns `BinaryFormat` if the file is not Mach-O.
pub async fn get_paths(rewriter: &MachORewriter, binary_path: &Path) -> Result<MachOPaths, Error> {
    Ok(rewriter.read_paths(binary_path).await?)
}

/// Make load paths under `root` relative to the binary's directory
///
/// Rpaths and dependencies under `root` become `@loader_path/<relative>`.
/// A dependency equal to the binary's own install name, and the install
/// name itself, become `@rpath/<file name>`. Everything else passes
/// through. Only the targets need to be under `root`; the binary may live
/// elsewhere.
///
/// # Errors
///
/// Returns `PathEscapesRoot` if a path cannot be expressed relative to the
/// binary, and `NotAbsolute` if `binary_path` is relative.
pub fn make_relative(
    binary_path: &Path,
    root: &Path,
    paths: &MachOPaths,
) -> Result<MachOPaths, RelocationError> {
    let dir = binary_path.parent().ok_or_else(|| RelocationError::NotAbsolute {
        path: binary_path.display().to_string(),
    })?;
    let relative = |entry: &String| -> Result<String, RelocationError> {
        let path = Path::new(entry);
        if path.is_absolute() && is_under(path, root) {
            loader_relative(LOADER_PATH, dir, path)
        } else {
            Ok(entry.clone())
        }
    };

    let rpaths = paths.rpaths.iter().map(relative).collect::<Result<Vec<_>, _>>()?;
    let deps = paths
        .deps
        .iter()
        .map(|dep| {
            if paths.id.as_ref() == Some(dep) {
                Ok(rpath_name(dep))
            } else {
                relative(dep)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let id = paths.id.as_deref().map(rpath_name);

    Ok(MachOPaths::new(rpaths, deps, id))
}

/// Replace `old_root` with `new_root` in rpaths, dependencies and the
/// install name
#[must_use]
pub fn replace_paths(old_root: &Path, new_root: &Path, paths: &MachOPaths) -> MachOPaths {
    map_paths(&PrefixMap::single(old_root, new_root), paths)
}

/// [`replace_paths`] over an ordered set of substitutions
#[must_use]
pub fn map_paths(map: &PrefixMap, paths: &MachOPaths) -> MachOPaths {
    MachOPaths::new(
        map.map_all(&paths.rpaths),
        map.map_all(&paths.deps),
        paths
            .id
            .as_ref()
            .map(|id| map.map_str(id).unwrap_or_else(|| id.clone())),
    )
}

/// Rewrite the load commands of `binary_path` from `old` to `new`
///
/// Returns whether the file changed. Every slice of a fat file is
/// rewritten.
///
/// # Errors
///
/// Returns `BinaryFormat` if the file is not Mach-O, a string does not fit
/// its load command, or `old` no longer matches the file.
pub async fn apply(
    rewriter: &MachORewriter,
    binary_path: &Path,
    old: &MachOPaths,
    new: &MachOPaths,
) -> Result<bool, Error> {
    if old == new {
        return Ok(false);
    }
    rewriter.write_paths(binary_path, old, new).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn sample(id: Option<&str>) -> MachOPaths {
        MachOPaths::new(
            strings(&[
                "/Users/Shared/spack/pkgA/lib",
                "/Users/Shared/spack/pkgB/lib",
                "/usr/local/lib",
            ]),
            strings(&[
                "/Users/Shared/spack/pkgA/libA.dylib",
                "/Users/Shared/spack/pkgB/libB.dylib",
                "/usr/local/lib/libloco.dylib",
            ]),
            id.map(str::to_string),
        )
    }

    #[test]
    fn relative_across_sibling_root() {
        let out = make_relative(
            Path::new("/Users/Shares/spack/pkgC/lib/libC.dylib"),
            Path::new("/Users/Shared/spack"),
            &sample(Some("/Users/Shared/spack/pkgC/lib/libC.dylib")),
        )
        .unwrap();
        assert_eq!(
            out,
            MachOPaths::new(
                strings(&[
                    "@loader_path/../../../../Shared/spack/pkgA/lib",
                    "@loader_path/../../../../Shared/spack/pkgB/lib",
                    "/usr/local/lib",
                ]),
                strings(&[
                    "@loader_path/../../../../Shared/spack/pkgA/libA.dylib",
                    "@loader_path/../../../../Shared/spack/pkgB/libB.dylib",
                    "/usr/local/lib/libloco.dylib",
                ]),
                Some("@rpath/libC.dylib".to_string()),
            )
        );
    }

    #[test]
    fn relative_for_executable() {
        let out = make_relative(
            Path::new("/Users/Shared/spack/pkgC/bin/exeC"),
            Path::new("/Users/Shared/spack"),
            &sample(None),
        )
        .unwrap();
        assert_eq!(
            out,
            MachOPaths::new(
                strings(&["@loader_path/../../pkgA/lib", "@loader_path/../../pkgB/lib", "/usr/local/lib"]),
                strings(&[
                    "@loader_path/../../pkgA/libA.dylib",
                    "@loader_path/../../pkgB/libB.dylib",
                    "/usr/local/lib/libloco.dylib",
                ]),
                None,
            )
        );
    }

    #[test]
    fn self_reference_uses_rpath() {
        let paths = MachOPaths::new(
            Vec::new(),
            strings(&["/opt/pkg/lib/libself.dylib", "/opt/dep/lib/libdep.dylib"]),
            Some("/opt/pkg/lib/libself.dylib".to_string()),
        );
        let out = make_relative(Path::new("/opt/pkg/lib/libself.dylib"), Path::new("/opt"), &paths).unwrap();
        assert_eq!(
            out.deps,
            strings(&["@rpath/libself.dylib", "@loader_path/../../dep/lib/libdep.dylib"])
        );
        assert_eq!(out.id.as_deref(), Some("@rpath/libself.dylib"));
    }

    #[test]
    fn replacement() {
        let out = replace_paths(
            Path::new("/Users/Shared/spack"),
            Path::new("/Applications/spack"),
            &sample(Some("/Users/Shared/spack/pkgC/lib/libC.dylib")),
        );
        assert_eq!(
            out,
            MachOPaths::new(
                strings(&["/Applications/spack/pkgA/lib", "/Applications/spack/pkgB/lib", "/usr/local/lib"]),
                strings(&[
                    "/Applications/spack/pkgA/libA.dylib",
                    "/Applications/spack/pkgB/libB.dylib",
                    "/usr/local/lib/libloco.dylib",
                ]),
                Some("/Applications/spack/pkgC/lib/libC.dylib".to_string()),
            )
        );

        let no_id = replace_paths(
            Path::new("/Users/Shared/spack"),
            Path::new("/Applications/spack"),
            &sample(None),
        );
        assert_eq!(no_id.id, None);
        assert_eq!(no_id.rpaths[0], "/Applications/spack/pkgA/lib");
    }
}
