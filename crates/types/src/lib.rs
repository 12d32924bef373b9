#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for fleetpkg
//!
//! This crate provides the loose version model, the typed catalog item
//! record and its loader, package receipts and install-state verdicts.

pub mod catalog;
pub mod receipt;
pub mod state;
pub mod version;

// Re-export commonly used types
pub use catalog::{
    load_catalog, parse_catalog, parse_document, CatalogEntry, CatalogItem, InstallerType, InstallsItem,
    InstallsKind, ReceiptRequirement, RestartAction, ScriptKind, ScriptSource,
};
pub use receipt::{InstalledReceipts, PackageReceipt};
pub use state::{InstallState, ScriptResult};
pub use version::{
    compare, name_and_version, pad_version, trim, LooseVersion, VersionComparison,
};
