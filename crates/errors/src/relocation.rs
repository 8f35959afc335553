//! Relocation error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RelocationError {
    #[error("path {path} escapes {base}")]
    PathEscapesRoot { path: String, base: String },

    #[error("path is not absolute: {path}")]
    NotAbsolute { path: String },

    #[error("invalid manifest entry {path}: {reason}")]
    InvalidManifestEntry { path: String, reason: String },

    #[error("relocation of {path} failed: {message}")]
    Failed { path: String, message: String },

    #[error("{count} file(s) still reference {root} after relocation")]
    CorruptTree { root: String, count: usize },
}

impl UserFacingError for RelocationError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::CorruptTree { .. } => {
                Some("The tree was removed; reinstall the package from the build cache.")
            }
            Self::InvalidManifestEntry { .. } => {
                Some("Recreate the build cache entry with a current bindist.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::PathEscapesRoot { .. } => "relocation.path_escapes_root",
            Self::NotAbsolute { .. } => "relocation.not_absolute",
            Self::InvalidManifestEntry { .. } => "relocation.invalid_manifest",
            Self::Failed { .. } => "relocation.failed",
            Self::CorruptTree { .. } => "relocation.corrupt_tree",
        })
    }
}
