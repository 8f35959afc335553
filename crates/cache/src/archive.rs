//! Deterministic zstd-compressed tar archives of install trees

use async_compression::tokio::bufread::ZstdDecoder;
use async_compression::tokio::write::ZstdEncoder;
use bindist_errors::{CacheError, Error};
use bindist_types::{BuildManifest, MANIFEST_PATH};
use std::io::Write;
use std::path::{Component, Path};
use tar::{Archive, EntryType, Header};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};

/// Timestamp stamped on every archive member
///
/// Taken from `SOURCE_DATE_EPOCH` when set, otherwise zero.
#[must_use]
pub fn source_date_epoch() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn archive_error(path: &Path, err: &std::io::Error) -> Error {
    CacheError::ArchiveFailed {
        message: format!("{}: {err}", path.display()),
    }
    .into()
}

fn extraction_error(message: impl Into<String>) -> Error {
    CacheError::ExtractionFailed {
        message: message.into(),
    }
    .into()
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Scratch file next to `near`, removed on drop
fn scratch_file(near: &Path) -> Result<tempfile::NamedTempFile, Error> {
    let dir = near
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(std::env::temp_dir, Path::to_path_buf);
    tempfile::Builder::new()
        .prefix(".bindist-tar-")
        .tempfile_in(&dir)
        .map_err(|e| archive_error(&dir, &e))
}

/// Archive the tree at `src` into a zstd-compressed tar at `output`
///
/// Members are sorted by path and carry zero owners and the
/// [`source_date_epoch`] timestamp, so archiving the same tree twice
/// produces identical bytes. Symlinks are stored as links and permission
/// bits are kept.
///
/// # Errors
///
/// Returns `ArchiveFailed` if the tree cannot be read or the archive
/// cannot be written.
pub async fn create_archive(src: &Path, output: &Path) -> Result<(), Error> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| archive_error(parent, &e))?;
    }

    let tar_file = scratch_file(output)?;
    let tar_path = tar_file.path().to_path_buf();
    let src = src.to_path_buf();
    let mtime = source_date_epoch();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&tar_path).map_err(|e| archive_error(&tar_path, &e))?;
        let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
        builder.follow_symlinks(false);
        append_tree(&mut builder, &src, Path::new(""), mtime)?;
        let mut writer = builder.into_inner().map_err(|e| archive_error(&tar_path, &e))?;
        writer.flush().map_err(|e| archive_error(&tar_path, &e))?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::internal(format!("archive task failed: {e}")))??;

    let input = File::open(tar_file.path())
        .await
        .map_err(|e| archive_error(tar_file.path(), &e))?;
    let output_file = File::create(output)
        .await
        .map_err(|e| archive_error(output, &e))?;
    let mut encoder = ZstdEncoder::new(output_file);
    let mut reader = BufReader::new(input);
    tokio::io::copy(&mut reader, &mut encoder)
        .await
        .map_err(|e| archive_error(output, &e))?;
    encoder
        .shutdown()
        .await
        .map_err(|e| archive_error(output, &e))?;

    Ok(())
}

/// Append the children of `dir` in name order, recursing into directories
fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    relative: &Path,
    mtime: u64,
) -> Result<(), Error> {
    let mut entries = std::fs::read_dir(dir)
        .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
        .map_err(|e| archive_error(dir, &e))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let name = relative.join(entry.file_name());
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| archive_error(&path, &e))?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode_of(&metadata));

        if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| archive_error(&path, &e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, &name, &target)
                .map_err(|e| archive_error(&path, &e))?;
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(|e| archive_error(&path, &e))?;
            append_tree(builder, &path, &name, mtime)?;
        } else if file_type.is_file() {
            let file = std::fs::File::open(&path).map_err(|e| archive_error(&path, &e))?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            builder
                .append_data(&mut header, &name, file)
                .map_err(|e| archive_error(&path, &e))?;
        }
        // Sockets and device nodes are not packaged
    }
    Ok(())
}

/// Unpack the archive at `archive` into `dest`
///
/// # Errors
///
/// Returns `ExtractionFailed` if the archive is corrupt or a member would
/// land outside `dest`.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| extraction_error(format!("{}: {e}", dest.display())))?;

    let tar_file = scratch_file(dest)?;
    {
        let input = File::open(archive)
            .await
            .map_err(|e| extraction_error(format!("{}: {e}", archive.display())))?;
        let mut output = File::create(tar_file.path())
            .await
            .map_err(|e| extraction_error(e.to_string()))?;
        let mut decoder = ZstdDecoder::new(BufReader::new(input));
        tokio::io::copy(&mut decoder, &mut output)
            .await
            .map_err(|e| extraction_error(format!("failed to decompress {}: {e}", archive.display())))?;
        output
            .flush()
            .await
            .map_err(|e| extraction_error(e.to_string()))?;
    }

    let tar_path = tar_file.path().to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&tar_path).map_err(|e| extraction_error(e.to_string()))?;
        let mut archive = Archive::new(file);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_unpack_xattrs(false);

        for entry in archive.entries().map_err(|e| extraction_error(e.to_string()))? {
            let mut entry = entry.map_err(|e| extraction_error(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| extraction_error(e.to_string()))?
                .into_owned();

            if path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return Err(extraction_error(format!(
                    "archive member {} escapes the destination",
                    path.display()
                )));
            }

            let unpacked = entry
                .unpack_in(&dest)
                .map_err(|e| extraction_error(format!("{}: {e}", path.display())))?;
            if !unpacked {
                return Err(extraction_error(format!(
                    "archive member {} escapes the destination",
                    path.display()
                )));
            }
        }
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::internal(format!("extract task failed: {e}")))??;

    drop(tar_file);
    Ok(())
}

/// Read the manifest embedded in an extracted tree
///
/// # Errors
///
/// Returns `ManifestMissing` if the tree has no manifest, and a parse or
/// validation error if it is malformed.
pub async fn read_embedded_manifest(prefix: &Path) -> Result<BuildManifest, Error> {
    let path = prefix.join(MANIFEST_PATH);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CacheError::ManifestMissing.into());
        }
        Err(e) => return Err(Error::io_with_path(&e, path)),
    };
    BuildManifest::from_toml(&content)
}
