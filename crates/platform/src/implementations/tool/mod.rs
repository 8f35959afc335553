//! Rewriters that shell out to patchelf and `install_name_tool`
//!
//! Reading still goes through the native parsers; only writes invoke the
//! external tool, which may grow the file where the native path cannot.

mod install_name_tool;
mod patchelf;

pub use install_name_tool::InstallNameToolRewriter;
pub use patchelf::PatchelfRewriter;

use bindist_errors::PlatformError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use tokio::process::Command;

/// Lazily resolved path to an external helper
///
/// The lookup happens once, at first use. A missing tool is reported as
/// [`PlatformError::ToolUnavailable`] on that and every later call.
#[derive(Debug)]
pub struct ToolLocator {
    name: &'static str,
    resolved: OnceLock<Result<PathBuf, PlatformError>>,
}

impl ToolLocator {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            resolved: OnceLock::new(),
        }
    }

    /// Use an explicit path instead of searching `PATH`
    #[must_use]
    pub fn with_path(name: &'static str, path: PathBuf) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(Ok(path));
        Self { name, resolved }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the tool
    ///
    /// # Errors
    ///
    /// Returns `ToolUnavailable` if the tool is not on `PATH`.
    pub fn path(&self) -> Result<&Path, PlatformError> {
        let resolved = self.resolved.get_or_init(|| {
            which::which(self.name).map_err(|_| PlatformError::ToolUnavailable {
                tool: self.name.to_string(),
            })
        });
        match resolved {
            Ok(path) => Ok(path.as_path()),
            Err(err) => Err(err.clone()),
        }
    }
}

/// Run a resolved tool and capture its output
async fn run_tool(tool: &ToolLocator, args: &[OsString]) -> Result<Output, PlatformError> {
    let program = tool.path()?;
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlatformError::ToolUnavailable {
                    tool: tool.name().to_string(),
                }
            } else {
                PlatformError::ProcessExecutionFailed {
                    command: tool.name().to_string(),
                    message: e.to_string(),
                }
            }
        })
}
