//! Filesystem helpers shared by the rewriters and the relocation engine

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Temporary sibling used while rewriting `path`
fn sibling_temp(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".bindist-tmp");
    path.with_file_name(name)
}

/// Replace the contents of `path` with `data`, keeping its permission bits
///
/// Data is written to a sibling temporary file which is then renamed over
/// the original, so readers never observe a half-written file.
///
/// # Errors
///
/// Returns an error if the original cannot be inspected or the temporary
/// file cannot be written or renamed.
pub async fn write_preserving_permissions(path: &Path, data: &[u8]) -> io::Result<()> {
    let permissions = fs::metadata(path).await?.permissions();
    let temp = sibling_temp(path);

    let result = async {
        fs::write(&temp, data).await?;
        fs::set_permissions(&temp, permissions).await?;
        fs::rename(&temp, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp).await;
    }
    result
}

/// Remove the symlink at `link` and create a new one pointing at `target`
///
/// # Errors
///
/// Returns an error if `link` is not a symlink or cannot be replaced.
#[cfg(unix)]
pub fn replace_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(link)?;
    if !metadata.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a symbolic link", link.display()),
        ));
    }
    std::fs::remove_file(link)?;
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn replace_symlink(_link: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Remove a directory tree if it exists
///
/// # Errors
///
/// Returns an error if the tree exists but cannot be removed.
pub async fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rewrite_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, b"old").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        write_preserving_permissions(&path, b"new contents").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
        assert!(!sibling_temp(&path).exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[cfg(unix)]
    #[test]
    fn replace_symlink_requires_a_link() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(replace_symlink(&file, Path::new("/elsewhere")).is_err());

        let link = dir.path().join("link");
        std::os::unix::fs::symlink("/old/target", &link).unwrap();
        replace_symlink(&link, Path::new("/new/target")).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("/new/target"));
    }

    #[tokio::test]
    async fn remove_tree_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_tree(&dir.path().join("absent")).await.unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        remove_tree(&dir.path().join("a")).await.unwrap();
        assert!(!dir.path().join("a").exists());
    }
}
