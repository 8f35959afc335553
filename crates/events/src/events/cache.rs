use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::FailureContext;

/// Phases of the packaging and install state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePhase {
    Analyze,
    Archive,
    Sign,
    Publish,
    Lookup,
    Fetch,
    Verify,
    Extract,
    ReadManifest,
    Relocate,
    Validate,
    Register,
}

impl fmt::Display for CachePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analyze => "analyze",
            Self::Archive => "archive",
            Self::Sign => "sign",
            Self::Publish => "publish",
            Self::Lookup => "lookup",
            Self::Fetch => "fetch",
            Self::Verify => "verify",
            Self::Extract => "extract",
            Self::ReadManifest => "read_manifest",
            Self::Relocate => "relocate",
            Self::Validate => "validate",
            Self::Register => "register",
        };
        f.write_str(name)
    }
}

/// Build cache events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    PhaseStarted { package: String, phase: CachePhase },

    Published {
        package: String,
        mirror: String,
        key: String,
        signed: bool,
    },

    /// Signing or verification skipped on request
    SignatureSkipped { package: String, phase: CachePhase },

    Installed {
        package: String,
        prefix: PathBuf,
        unrelocated: Vec<PathBuf>,
    },

    Failed {
        package: String,
        phase: CachePhase,
        failure: FailureContext,
    },

    SpecCacheRefreshed { mirrors: usize, specs: usize },

    KeyInstalled { id: String, path: PathBuf },
}
