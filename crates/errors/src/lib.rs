#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for fleetpkg
//!
//! One enum per domain, folded into [`Error`] at crate boundaries. Every
//! error is `Clone` so a scan can hand the same failure to the item's
//! report and to the event stream.

use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

pub mod catalog;
pub mod config;
pub mod package;
pub mod platform;
pub mod scan;
pub mod script;

pub use catalog::CatalogError;
pub use config::ConfigError;
pub use package::PackageError;
pub use platform::PlatformError;
pub use scan::ScanError;
pub use script::ScriptError;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("internal error: {0}")]
    Internal(String),

    /// `io::Error` is not `Clone`, so only its kind and text are kept
    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<PathBuf>,
    },
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn io_with_path(err: &std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Whether the install-state engine may fall through to the next
    /// precedence rule instead of failing the item.
    #[must_use]
    pub fn is_soft_script_failure(&self) -> bool {
        match self {
            Error::Platform(err) => err.is_launch_failure() || err.is_timeout(),
            Error::Script(err) => err.is_soft(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the CLI and the event stream need to describe a failure
pub trait UserFacingError {
    fn user_message(&self) -> Cow<'_, str>;

    /// One sentence telling the operator what to change.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    fn is_retryable(&self) -> bool {
        false
    }

    /// Dotted `domain.reason` code, stable across releases.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Platform(err) => err.user_message(),
            Error::Script(err) => err.user_message(),
            Error::Package(err) => err.user_message(),
            Error::Io {
                message,
                path: Some(path),
                ..
            } => Cow::Owned(format!("{}: {message}", path.display())),
            Error::Io { message, .. } => Cow::Borrowed(message),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Platform(err) => err.user_hint(),
            Error::Script(err) => err.user_hint(),
            Error::Package(err) => err.user_hint(),
            Error::Catalog(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Platform(err) => err.is_retryable(),
            Error::Io { kind, .. } => matches!(
                kind,
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Platform(err) => err.user_code(),
            Error::Script(err) => err.user_code(),
            Error::Package(err) => err.user_code(),
            Error::Catalog(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Scan(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}
