//! Build cache packaging and install errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("{package} is already installed at {prefix}")]
    AlreadyInstalled { package: String, prefix: String },

    #[error("{key} is already published on mirror {mirror}")]
    AlreadyPublished { key: String, mirror: String },

    #[error("no package matching {query} on any mirror")]
    NotFound { query: String },

    #[error("{query} matches several packages: {candidates}")]
    Ambiguous { query: String, candidates: String },

    #[error("no mirrors configured")]
    NoMirrors,

    #[error("unknown mirror: {name}")]
    UnknownMirror { name: String },

    #[error("checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("archive operation failed: {message}")]
    ArchiveFailed { message: String },

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("archive has no embedded manifest")]
    ManifestMissing,

    #[error("invalid build cache entry {key}: {message}")]
    InvalidEntry { key: String, message: String },

    #[error("install of {package} timed out after {millis}ms")]
    Timeout { package: String, millis: u64 },

    #[error("registry error: {message}")]
    Registry { message: String },
}

impl UserFacingError for CacheError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyInstalled { .. } => Some("Pass --force to replace the existing tree."),
            Self::AlreadyPublished { .. } => Some("Pass --force to overwrite the mirror entry."),
            Self::Ambiguous { .. } => Some("Use /<hash> to select a single package."),
            Self::NoMirrors => Some("Add a [[mirrors]] entry to the config or pass --mirror."),
            Self::ChecksumMismatch { .. } => Some("The mirror entry is damaged; recreate it."),
            Self::Timeout { .. } => Some("Raise install.timeout_secs or retry the install."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::AlreadyInstalled { .. } => "cache.already_installed",
            Self::AlreadyPublished { .. } => "cache.already_published",
            Self::NotFound { .. } => "cache.not_found",
            Self::Ambiguous { .. } => "cache.ambiguous",
            Self::NoMirrors => "cache.no_mirrors",
            Self::UnknownMirror { .. } => "cache.unknown_mirror",
            Self::ChecksumMismatch { .. } => "cache.checksum_mismatch",
            Self::ArchiveFailed { .. } => "cache.archive_failed",
            Self::ExtractionFailed { .. } => "cache.extraction_failed",
            Self::ManifestMissing => "cache.manifest_missing",
            Self::InvalidEntry { .. } => "cache.invalid_entry",
            Self::Timeout { .. } => "cache.timeout",
            Self::Registry { .. } => "cache.registry",
        })
    }
}
