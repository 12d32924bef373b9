//! Check-script evaluation errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ScriptError {
    #[error("{path} is not secure: {reason}")]
    InsecurePermissions { path: String, reason: String },

    #[error("script does not exist: {path}")]
    NotFound { path: String },

    #[error("could not write {script} for {item}: {message}")]
    MaterializeFailed {
        script: String,
        item: String,
        message: String,
    },

    #[error("could not verify permissions of {path}: {message}")]
    VerifyFailed { path: String, message: String },
}

impl ScriptError {
    /// Soft failures degrade to the next evidence rule; permission refusals
    /// never do.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MaterializeFailed { .. })
    }
}

impl UserFacingError for ScriptError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::InsecurePermissions { .. } | Self::VerifyFailed { .. } => Some(
                "Scripts must be owned by root or the agent user, grouped wheel or admin, executable and not world-writable.",
            ),
            Self::NotFound { .. } => Some("Check the script path in the catalog item."),
            Self::MaterializeFailed { .. } => Some("Ensure the temporary directory is writable."),
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InsecurePermissions { .. } => "script.insecure_permissions",
            Self::NotFound { .. } => "script.not_found",
            Self::MaterializeFailed { .. } => "script.materialize_failed",
            Self::VerifyFailed { .. } => "script.verify_failed",
        };
        Some(code)
    }
}
