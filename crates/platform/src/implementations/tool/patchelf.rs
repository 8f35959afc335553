use async_trait::async_trait;
use bindist_errors::PlatformError;
use bindist_types::{DynamicPathTag, ElfPaths};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{run_tool, ToolLocator};
use crate::binary::BinaryRewriter;
use crate::implementations::native::NativeElfRewriter;

/// Rewrites ELF search paths with `patchelf --set-rpath`
#[derive(Debug)]
pub struct PatchelfRewriter {
    tool: ToolLocator,
}

impl PatchelfRewriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool: ToolLocator::new("patchelf"),
        }
    }

    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            tool: ToolLocator::with_path("patchelf", path),
        }
    }
}

impl Default for PatchelfRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BinaryRewriter for PatchelfRewriter {
    type Paths = ElfPaths;

    fn name(&self) -> &'static str {
        "patchelf"
    }

    async fn read_paths(&self, binary: &Path) -> Result<ElfPaths, PlatformError> {
        NativeElfRewriter::new().read_paths(binary).await
    }

    async fn write_paths(
        &self,
        binary: &Path,
        old: &ElfPaths,
        new: &ElfPaths,
    ) -> Result<(), PlatformError> {
        if old.rpaths == new.rpaths {
            return Ok(());
        }
        if old.rpaths.len() != new.rpaths.len() {
            return Err(PlatformError::BinaryFormat {
                path: binary.display().to_string(),
                message: "search path entry count would change".to_string(),
            });
        }

        let mut args: Vec<OsString> = Vec::new();
        // Keep DT_RPATH binaries on DT_RPATH; patchelf converts to
        // DT_RUNPATH otherwise.
        if old.tag == Some(DynamicPathTag::Rpath) {
            args.push("--force-rpath".into());
        }
        args.push("--set-rpath".into());
        args.push(new.joined().into());
        args.push(binary.as_os_str().to_owned());

        let output = run_tool(&self.tool, &args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PlatformError::BinaryOperationFailed {
                operation: "patchelf --set-rpath".to_string(),
                binary_path: binary.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
