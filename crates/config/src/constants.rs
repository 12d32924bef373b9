//! Default locations of the system tools and directories fleetpkg reads
//!
//! All of them can be overridden from the `[tools]` and `[paths]` tables.

pub const XAR: &str = "/usr/bin/xar";
pub const LSBOM: &str = "/usr/bin/lsbom";
pub const PKGUTIL: &str = "/usr/sbin/pkgutil";
pub const INSTALLER: &str = "/usr/sbin/installer";
pub const PAX: &str = "/bin/pax";

pub const RECEIPTS_DIR: &str = "/Library/Receipts";

pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
