//! Package introspection error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PackageError {
    #[error("no receipts could be extracted from {path}")]
    NoReceipts { path: String },

    #[error("invalid package format: {message}")]
    InvalidFormat { message: String },

    #[error("unsupported installer item: {path}")]
    Unsupported { path: String },

    #[error("failed to parse {manifest} in {path}: {message}")]
    ManifestParse {
        manifest: String,
        path: String,
        message: String,
    },

    #[error("failed to read property list {path}: {message}")]
    PlistRead { path: String, message: String },

    #[error("package not found: {path}")]
    NotFound { path: String },
}

impl UserFacingError for PackageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoReceipts { .. } | Self::InvalidFormat { .. } | Self::ManifestParse { .. } => {
                Some("The installer item may be damaged; flag the catalog item as broken and re-import the package.")
            }
            Self::Unsupported { .. } => Some("Only .pkg, .mpkg and .dist installer items can be inspected."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoReceipts { .. } => "package.no_receipts",
            Self::InvalidFormat { .. } => "package.invalid_format",
            Self::Unsupported { .. } => "package.unsupported",
            Self::ManifestParse { .. } => "package.manifest_parse",
            Self::PlistRead { .. } => "package.plist_read",
            Self::NotFound { .. } => "package.not_found",
        };
        Some(code)
    }
}
