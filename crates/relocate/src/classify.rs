//! File type signatures and the treatment derived from them
//!
//! Signatures use the `type/subtype` vocabulary of `file --mime-type`, with
//! `symbolic link to` as the type of symlinks. They are computed from the
//! leading bytes of the file; no external process is spawned.

use bindist_errors::Error;
use bindist_platform::{probe_object, ObjectKind, ObjectProbe};
use bindist_types::{FileTreatment, ObjectFormat};
use bstr::ByteSlice;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Type given to symbolic links
pub const SYMLINK_TYPE: &str = "symbolic link to";

/// Bytes inspected when sniffing a regular file
const SNIFF_LEN: u64 = 64 * 1024;

/// A `type/subtype` pair in the style of `file --mime-type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSignature {
    pub filetype: String,
    pub subtype: String,
}

impl FileSignature {
    #[must_use]
    pub fn new(filetype: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            filetype: filetype.into(),
            subtype: subtype.into(),
        }
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.filetype == SYMLINK_TYPE
    }
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_symlink() {
            write!(f, "{} {}", self.filetype, self.subtype)
        } else {
            write!(f, "{}/{}", self.filetype, self.subtype)
        }
    }
}

/// Object files whose load paths may embed the install root
#[must_use]
pub fn needs_binary_relocation(filetype: &str, subtype: &str) -> bool {
    filetype == "application" && matches!(subtype, "x-sharedlib" | "x-executable" | "x-mach-binary")
}

/// Text files that may embed the install root
#[must_use]
pub fn needs_text_relocation(filetype: &str, subtype: &str) -> bool {
    filetype == "text" && (subtype.starts_with("x-") || subtype == "plain")
}

fn signature_of_bytes(data: &[u8]) -> FileSignature {
    if data.is_empty() {
        return FileSignature::new("inode", "x-empty");
    }

    if let Some(ObjectProbe { format, kind }) = probe_object(data) {
        let subtype = match (format, kind) {
            (ObjectFormat::MachO, _) => "x-mach-binary",
            (ObjectFormat::Elf, ObjectKind::Executable) => "x-executable",
            (ObjectFormat::Elf, ObjectKind::SharedLibrary) => "x-sharedlib",
            (ObjectFormat::Elf, ObjectKind::Other) => "x-object",
        };
        return FileSignature::new("application", subtype);
    }

    if data.find_byte(0).is_none() && is_utf8_prefix(data) {
        let subtype = if data.starts_with(b"#!") {
            "x-shellscript"
        } else {
            "plain"
        };
        return FileSignature::new("text", subtype);
    }

    FileSignature::new("application", "octet-stream")
}

/// UTF-8, allowing a multi-byte sequence cut off by the sniff window
fn is_utf8_prefix(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && data.len() as u64 == SNIFF_LEN,
    }
}

/// Derive the signature of the entry at `path` without following symlinks
///
/// # Errors
///
/// Returns an error if the entry cannot be inspected or read.
pub async fn sniff(path: &Path) -> Result<FileSignature, Error> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;

    if metadata.file_type().is_symlink() {
        let target = tokio::fs::read_link(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        return Ok(FileSignature::new(SYMLINK_TYPE, target.display().to_string()));
    }
    if metadata.is_dir() {
        return Ok(FileSignature::new("inode", "directory"));
    }
    if !metadata.is_file() {
        return Ok(FileSignature::new("inode", "x-special"));
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    let mut data = Vec::new();
    file.take(SNIFF_LEN)
        .read_to_end(&mut data)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    Ok(signature_of_bytes(&data))
}

/// Map a signature to the engine's treatment
#[must_use]
pub fn treatment_of(signature: &FileSignature) -> FileTreatment {
    if signature.is_symlink() {
        FileTreatment::Symlink
    } else if needs_binary_relocation(&signature.filetype, &signature.subtype) {
        if signature.subtype == "x-mach-binary" {
            FileTreatment::Binary(ObjectFormat::MachO)
        } else {
            FileTreatment::Binary(ObjectFormat::Elf)
        }
    } else if needs_text_relocation(&signature.filetype, &signature.subtype) {
        FileTreatment::Text
    } else {
        FileTreatment::Opaque
    }
}

/// Classify the entry at `path`
///
/// # Errors
///
/// Returns an error if the entry cannot be inspected or read.
pub async fn classify(path: &Path) -> Result<FileTreatment, Error> {
    Ok(treatment_of(&sniff(path).await?))
}
