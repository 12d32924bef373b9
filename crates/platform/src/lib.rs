#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform layer for fleetpkg
//!
//! This crate provides:
//! - Process execution with timeouts, cancellation and concurrent pipe draining
//! - The registry of external tools (xar, lsbom, pkgutil, installer, pax)
//! - Process identity and group lookups for the script permission policy

pub mod identity;
pub mod process;
pub mod tools;

pub use identity::{group_id, group_ids, ProcessIdentity};
pub use process::{
    execute_blocking, CommandOutput, PlatformCommand, ProcessRunner, SystemProcessRunner,
};
pub use tools::{Tool, ToolRegistry};
pub use tokio_util::sync::CancellationToken;
