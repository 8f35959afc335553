use async_trait::async_trait;
use bindist_errors::PlatformError;
use bindist_types::MachOPaths;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{run_tool, ToolLocator};
use crate::binary::BinaryRewriter;
use crate::implementations::native::NativeMachORewriter;

/// Rewrites Mach-O load commands with a single `install_name_tool` call
#[derive(Debug)]
pub struct InstallNameToolRewriter {
    tool: ToolLocator,
}

impl InstallNameToolRewriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool: ToolLocator::new("install_name_tool"),
        }
    }

    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            tool: ToolLocator::with_path("install_name_tool", path),
        }
    }

    fn arguments(binary: &Path, old: &MachOPaths, new: &MachOPaths) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        for (from, to) in old.rpaths.iter().zip(&new.rpaths) {
            if from != to {
                args.extend(["-rpath".into(), from.into(), to.into()]);
            }
        }
        for (from, to) in old.deps.iter().zip(&new.deps) {
            if from != to {
                args.extend(["-change".into(), from.into(), to.into()]);
            }
        }
        if let (Some(from), Some(to)) = (&old.id, &new.id) {
            if from != to {
                args.extend(["-id".into(), to.into()]);
            }
        }
        if !args.is_empty() {
            args.push(binary.as_os_str().to_owned());
        }
        args
    }
}

impl Default for InstallNameToolRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BinaryRewriter for InstallNameToolRewriter {
    type Paths = MachOPaths;

    fn name(&self) -> &'static str {
        "install_name_tool"
    }

    async fn read_paths(&self, binary: &Path) -> Result<MachOPaths, PlatformError> {
        NativeMachORewriter::new().read_paths(binary).await
    }

    async fn write_paths(
        &self,
        binary: &Path,
        old: &MachOPaths,
        new: &MachOPaths,
    ) -> Result<(), PlatformError> {
        if old.rpaths.len() != new.rpaths.len()
            || old.deps.len() != new.deps.len()
            || old.id.is_some() != new.id.is_some()
        {
            return Err(PlatformError::BinaryFormat {
                path: binary.display().to_string(),
                message: "load command count would change".to_string(),
            });
        }

        let args = Self::arguments(binary, old, new);
        if args.is_empty() {
            return Ok(());
        }

        let output = run_tool(&self.tool, &args).await?;
        if output.status.success() {
            return crate::implementations::native::resign_adhoc(binary).await;
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("larger updated load commands do not fit") {
            Err(PlatformError::BinaryFormat {
                path: binary.display().to_string(),
                message: "not enough header padding for the new load commands".to_string(),
            })
        } else {
            Err(PlatformError::BinaryOperationFailed {
                operation: "install_name_tool".to_string(),
                binary_path: binary.display().to_string(),
                message: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_cover_only_changed_entries() {
        let old = MachOPaths::new(
            vec!["/old/lib".into(), "@loader_path/../lib".into()],
            vec!["/old/lib/libz.dylib".into(), "/usr/lib/libSystem.B.dylib".into()],
            Some("/old/lib/libfoo.dylib".into()),
        );
        let new = MachOPaths::new(
            vec!["/new/lib".into(), "@loader_path/../lib".into()],
            vec!["/new/lib/libz.dylib".into(), "/usr/lib/libSystem.B.dylib".into()],
            Some("/new/lib/libfoo.dylib".into()),
        );
        let args = InstallNameToolRewriter::arguments(Path::new("/tmp/libfoo.dylib"), &old, &new);
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-rpath",
                "/old/lib",
                "/new/lib",
                "-change",
                "/old/lib/libz.dylib",
                "/new/lib/libz.dylib",
                "-id",
                "/new/lib/libfoo.dylib",
                "/tmp/libfoo.dylib",
            ]
        );
    }

    #[test]
    fn unchanged_paths_need_no_call() {
        let paths = MachOPaths::new(vec!["/a".into()], vec![], None);
        assert!(InstallNameToolRewriter::arguments(Path::new("/x"), &paths, &paths).is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let rewriter = InstallNameToolRewriter {
            tool: ToolLocator::new("bindist-definitely-missing-tool"),
        };
        let old = MachOPaths::new(vec!["/a".into()], vec![], None);
        let new = MachOPaths::new(vec!["/b".into()], vec![], None);
        let err = rewriter
            .write_paths(Path::new("/nonexistent"), &old, &new)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::ToolUnavailable { .. }));
    }
}
