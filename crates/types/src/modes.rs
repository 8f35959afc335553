//! Mode switches for packaging and install

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a packaged archive gets a detached signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    Signed,
    Unsigned,
}

/// Whether an install checks the archive signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Verify,
    Unverified,
}

/// What to do when the target prefix is already occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteMode {
    FailIfExists,
    Force,
}

impl OverwriteMode {
    #[must_use]
    pub fn from_force(force: bool) -> Self {
        if force {
            Self::Force
        } else {
            Self::FailIfExists
        }
    }
}

/// Backend used to rewrite paths inside object files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriterKind {
    /// Edit load commands and the dynamic string table in place
    #[default]
    Native,
    /// Shell out to patchelf / `install_name_tool`
    Tool,
}

impl fmt::Display for RewriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for RewriterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown rewriter: {other}")),
        }
    }
}
