#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Install-state evaluation for fleetpkg
//!
//! Fuses check scripts, `installs` entries, OS versions and the
//! installed-receipts snapshot into one verdict per catalog item, plus the
//! two boolean views used for removal and "any version present" checks.

mod context;
mod engine;
pub mod evidence;
mod scan;

pub use context::{system_os_version, ScanContext};
pub use engine::{InstallStateEngine, ItemReport};
pub use evidence::Presence;
pub use scan::scan_catalog;
