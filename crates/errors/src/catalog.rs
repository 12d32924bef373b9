//! Catalog loading error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("{path} is neither a property list ({plist_error}) nor YAML ({yaml_error})")]
    SerializationFormat {
        path: String,
        plist_error: String,
        yaml_error: String,
    },

    #[error("catalog item {item} is invalid: {message}")]
    InvalidItem { item: String, message: String },

    #[error("catalog not found: {path}")]
    NotFound { path: String },
}

impl UserFacingError for CatalogError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SerializationFormat { .. } => {
                Some("Validate the file with plutil -lint or a YAML linter.")
            }
            Self::InvalidItem { .. } => Some("Fix the catalog item and rebuild the catalog."),
            Self::NotFound { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SerializationFormat { .. } => "catalog.serialization_format",
            Self::InvalidItem { .. } => "catalog.invalid_item",
            Self::NotFound { .. } => "catalog.not_found",
        };
        Some(code)
    }
}
