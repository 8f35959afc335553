use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;

/// Events emitted while analyzing or rewriting an install tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelocationEvent {
    /// Tree scanned and manifest built
    AnalysisCompleted {
        prefix: PathBuf,
        textfiles: usize,
        links: usize,
        binaries: usize,
    },

    /// Rewrite of a tree started
    Started {
        prefix: PathBuf,
        old_root: PathBuf,
        new_root: PathBuf,
    },

    /// A single file was rewritten
    FilePatched { path: PathBuf, kind: String },

    /// A single file could not be rewritten; recorded, not fatal
    FileFailed {
        path: PathBuf,
        failure: FailureContext,
    },

    Completed {
        prefix: PathBuf,
        relocated: usize,
        failed: usize,
    },

    /// Files still reference the old install root after relocation
    ValidationFailed {
        prefix: PathBuf,
        offending: Vec<PathBuf>,
    },
}
