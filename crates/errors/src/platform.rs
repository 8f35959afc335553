//! Platform-specific operation errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Errors raised while reading or rewriting object files and running
/// helper tools
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PlatformError {
    #[error("invalid binary format: {path} - {message}")]
    BinaryFormat { path: String, message: String },

    #[error("required tool not available: {tool}")]
    ToolUnavailable { tool: String },

    #[error("binary operation failed: {operation} on {binary_path} - {message}")]
    BinaryOperationFailed {
        operation: String,
        binary_path: String,
        message: String,
    },

    #[error("process execution failed: {command} - {message}")]
    ProcessExecutionFailed { command: String, message: String },

    #[error("filesystem operation failed: {operation} - {message}")]
    FilesystemOperationFailed { operation: String, message: String },
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolUnavailable { .. } => Some(
                "Install the helper tool or set `relocation.rewriter = \"native\"` in the config.",
            ),
            Self::BinaryFormat { .. } => {
                Some("The file is not a supported object file or has no room for the new path.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::BinaryFormat { .. } => "platform.binary_format",
            Self::ToolUnavailable { .. } => "platform.tool_unavailable",
            Self::BinaryOperationFailed { .. } => "platform.binary_operation_failed",
            Self::ProcessExecutionFailed { .. } => "platform.process_failed",
            Self::FilesystemOperationFailed { .. } => "platform.filesystem_failed",
        })
    }
}
