//! Catalog scan error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ScanError {
    #[error("failed to query installed receipts: {message}")]
    ReceiptQueryFailed { message: String },

    #[error("scan task failed: {message}")]
    TaskFailed { message: String },
}

impl UserFacingError for ScanError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ReceiptQueryFailed { .. } => "scan.receipt_query_failed",
            Self::TaskFailed { .. } => "scan.task_failed",
        };
        Some(code)
    }
}
