//! Locations of the system tools used for package introspection

use fleetpkg_config::ToolsConfig;
use fleetpkg_errors::PlatformError;
use std::fmt;
use std::path::{Path, PathBuf};

/// External tools fleetpkg shells out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Flat package archive reader
    Xar,
    /// Bill-of-materials lister
    Lsbom,
    /// System package registry
    Pkgutil,
    /// System installer, queried for restart actions
    Installer,
    /// Payload archive extractor
    Pax,
}

impl Tool {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Xar => "xar",
            Self::Lsbom => "lsbom",
            Self::Pkgutil => "pkgutil",
            Self::Installer => "installer",
            Self::Pax => "pax",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configured tool paths with a `PATH` fallback
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    xar: PathBuf,
    lsbom: PathBuf,
    pkgutil: PathBuf,
    installer: PathBuf,
    pax: PathBuf,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::from_config(&ToolsConfig::default())
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            xar: config.xar.clone(),
            lsbom: config.lsbom.clone(),
            pkgutil: config.pkgutil.clone(),
            installer: config.installer.clone(),
            pax: config.pax.clone(),
        }
    }

    /// Configured path, whether or not it exists
    #[must_use]
    pub fn configured(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Xar => &self.xar,
            Tool::Lsbom => &self.lsbom,
            Tool::Pkgutil => &self.pkgutil,
            Tool::Installer => &self.installer,
            Tool::Pax => &self.pax,
        }
    }

    /// Path to run: the configured one if present, otherwise a `PATH` lookup
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::CommandNotFound` if neither exists.
    pub fn resolve(&self, tool: Tool) -> Result<PathBuf, PlatformError> {
        let configured = self.configured(tool);
        if configured.is_file() {
            return Ok(configured.to_path_buf());
        }
        which::which(tool.name()).map_err(|_| PlatformError::CommandNotFound {
            command: configured.display().to_string(),
        })
    }
}
