//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fleetpkg - install-state and package introspection for managed Macs
#[derive(Parser)]
#[command(name = "fleetpkg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install-state and package introspection for managed Macs")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Decide the install state of every item in a catalog
    Scan {
        /// Catalog file (property list or YAML array of items)
        catalog: PathBuf,

        /// Items evaluated at once (0 = number of CPUs)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Override the running OS version used for OS installer items
        #[arg(long, value_name = "VERSION")]
        os_version: Option<String>,

        /// Per-script timeout in seconds
        #[arg(long, value_name = "SECS")]
        script_timeout: Option<u64>,
    },

    /// Extract receipts and metadata from a .pkg, .mpkg or .dist
    Inspect {
        /// Installer package path
        package: PathBuf,

        /// Also extract application icons into this directory
        #[arg(long, value_name = "DIR")]
        icons: Option<PathBuf>,
    },

    /// List package receipts installed on this machine
    Receipts,

    /// Compare two version strings
    Compare {
        /// Left-hand version
        this: String,

        /// Right-hand version
        that: String,
    },
}
