//! Platform-specific operation errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Errors that can occur while running external tools and scripts
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("failed to launch {command}: {message}")]
    LaunchFailed { command: String, message: String },

    #[error("{command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("process execution failed: {command} - {message}")]
    ProcessExecutionFailed { command: String, message: String },

    #[error("{command} was cancelled")]
    Cancelled { command: String },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("tool {tool} exited with status {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("unknown system group: {group}")]
    UnknownGroup { group: String },
}

impl PlatformError {
    /// The process could not be started at all (missing or unexecutable tool).
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailed { .. } | Self::CommandNotFound { .. }
        )
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::LaunchFailed { .. } | Self::CommandNotFound { .. } => {
                Some("Verify the tool exists and is executable, or override its path in the [tools] config section.")
            }
            Self::Timeout { .. } => {
                Some("Raise scan.script_timeout_secs or fix the script so it finishes promptly.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::LaunchFailed { .. } => "platform.launch_failed",
            Self::Timeout { .. } => "platform.timeout",
            Self::ProcessExecutionFailed { .. } => "platform.process_failed",
            Self::Cancelled { .. } => "platform.cancelled",
            Self::CommandNotFound { .. } => "platform.command_not_found",
            Self::ToolFailed { .. } => "platform.tool_failed",
            Self::UnknownGroup { .. } => "platform.unknown_group",
        };
        Some(code)
    }
}
