//! In-place rewriters that never change the size of an object file

mod elf;
mod macho;

pub use elf::{dynamic_search_paths, NativeElfRewriter};
pub use macho::{macho_filetype, NativeMachORewriter};
pub(crate) use macho::resign_adhoc;

use bindist_errors::PlatformError;
use std::path::Path;

pub(crate) fn format_error(path: &Path, message: impl Into<String>) -> PlatformError {
    PlatformError::BinaryFormat {
        path: path.display().to_string(),
        message: message.into(),
    }
}

pub(crate) async fn read_binary(path: &Path) -> Result<Vec<u8>, PlatformError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| PlatformError::FilesystemOperationFailed {
            operation: format!("read {}", path.display()),
            message: e.to_string(),
        })
}

pub(crate) async fn write_binary(path: &Path, data: &[u8]) -> Result<(), PlatformError> {
    crate::fs::write_preserving_permissions(path, data)
        .await
        .map_err(|e| PlatformError::FilesystemOperationFailed {
            operation: format!("write {}", path.display()),
            message: e.to_string(),
        })
}
