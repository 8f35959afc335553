use serde::{Deserialize, Serialize};

use crate::EventSource;
use bindist_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod cache;
pub mod general;
pub mod relocation;

pub use cache::*;
pub use general::*;
pub use relocation::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Warnings not tied to a file or phase
    General(GeneralEvent),

    /// Per-file and per-tree relocation progress
    Relocation(RelocationEvent),

    /// Packaging and install state machine transitions
    Cache(CacheEvent),
}

impl AppEvent {
    /// Identify the source domain for this event.
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Relocation(_) => EventSource::RELOCATION,
            Self::Cache(_) => EventSource::CACHE,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::Relocation(RelocationEvent::ValidationFailed { .. })
            | Self::Cache(CacheEvent::Failed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Relocation(RelocationEvent::FileFailed { .. })
            | Self::Cache(CacheEvent::SignatureSkipped { .. }) => Level::WARN,

            Self::Relocation(RelocationEvent::FilePatched { .. })
            | Self::Cache(CacheEvent::SpecCacheRefreshed { .. }) => Level::DEBUG,

            _ => Level::INFO,
        }
    }
}
