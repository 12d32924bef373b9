#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Check-script evaluation for fleetpkg
//!
//! Catalog items can carry three scripts that override the receipt-based
//! install checks. Embedded bodies run from a private temporary file;
//! external scripts must first pass the ownership and mode policy.

mod evaluator;
mod materialize;
pub mod policy;

pub use evaluator::{installcheck_state, reported_version, uninstallcheck_present, ScriptEvaluator};
pub use materialize::materialize;
pub use policy::{FileFacts, ScriptPolicy};
