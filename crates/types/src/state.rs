//! Install-state verdicts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the declared version of an item is present on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    ThisVersionNotInstalled,
    ThisVersionInstalled,
    NewerVersionInstalled,
}

impl InstallState {
    /// True when nothing needs installing for this item
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        !matches!(self, Self::ThisVersionNotInstalled)
    }

    /// Short label for CLI tables
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ThisVersionNotInstalled => "not installed",
            Self::ThisVersionInstalled => "installed",
            Self::NewerVersionInstalled => "newer installed",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one script run, as consumed by the install-state rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ScriptResult {
    /// Exited on its own with status 0
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
