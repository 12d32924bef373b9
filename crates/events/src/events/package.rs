use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;

/// Installer package introspection events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PackageEvent {
    /// Inspection of an installer artifact starting
    InspectionStarted { path: PathBuf },

    /// Inspection finished with this many receipts
    InspectionCompleted {
        path: PathBuf,
        receipts: usize,
        duration_ms: u64,
    },

    /// Inspection failed
    InspectionFailed {
        path: PathBuf,
        failure: FailureContext,
    },

    /// System package registry queried
    RegistryQueried { source: String, receipts: usize },
}
