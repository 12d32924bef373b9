//! Catalog scan events

use fleetpkg_types::InstallState;
use serde::{Deserialize, Serialize};

use super::FailureContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Scan of a catalog started
    Started { items: usize, concurrency: usize },

    /// Installed-receipts snapshot built for this scan
    SnapshotBuilt { receipts: usize, duration_ms: u64 },

    /// All three install-state queries answered for one item
    ItemEvaluated {
        item: String,
        state: InstallState,
        some_version_installed: bool,
        evidence_this_is_installed: bool,
    },

    /// One item could not be evaluated; the scan continues
    ItemFailed {
        item: String,
        failure: FailureContext,
    },

    Completed {
        evaluated: usize,
        failed: usize,
        duration_ms: u64,
    },
}
