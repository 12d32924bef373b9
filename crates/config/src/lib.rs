#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for fleetpkg
//!
//! Values are layered, later layers winning: built-in defaults, the TOML
//! file (`~/.config/fleetpkg/config.toml` or `--config`), `FLEETPKG_*`
//! environment variables, then flags applied by the front end.

pub mod constants;

use fleetpkg_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub tools: ToolsConfig,
    pub paths: PathConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub script_timeout_secs: u64,
    /// Items evaluated at once; 0 picks the CPU count
    pub concurrency: usize,
    pub tool_timeout_secs: u64,
}

/// Locations of the external tools used for package introspection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub xar: PathBuf,
    pub lsbom: PathBuf,
    pub pkgutil: PathBuf,
    pub installer: PathBuf,
    pub pax: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub receipts_dir: PathBuf,
    pub temp_dir: Option<PathBuf>,
}

/// Groups besides the running user's own that may own check scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_script_groups: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: constants::DEFAULT_SCRIPT_TIMEOUT_SECS,
            concurrency: 0,
            tool_timeout_secs: constants::DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            xar: constants::XAR.into(),
            lsbom: constants::LSBOM.into(),
            pkgutil: constants::PKGUTIL.into(),
            installer: constants::INSTALLER.into(),
            pax: constants::PAX.into(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            receipts_dir: constants::RECEIPTS_DIR.into(),
            temp_dir: None,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_script_groups: vec!["wheel".to_string(), "admin".to_string()],
        }
    }
}

impl Config {
    /// `<config dir>/fleetpkg/config.toml`
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no per-user config directory.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("fleetpkg").join("config.toml"))
    }

    /// Parse and validate one TOML file; missing tables take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable, is not valid
    /// TOML, or sets a timeout of zero.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into(),
            _ => Error::io_with_path(&e, path),
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// The default file when it exists, built-in defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the default file exists but cannot be loaded.
    pub async fn load() -> Result<Self, Error> {
        let Ok(config_path) = Self::default_path() else {
            tracing::debug!("no config directory, using defaults");
            return Ok(Self::default());
        };

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// An explicit `--config` path must exist; without one fall back to [`Config::load`]
    ///
    /// # Errors
    ///
    /// Returns an error if the selected file cannot be loaded.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Apply `FLEETPKG_SCRIPT_TIMEOUT`, `FLEETPKG_CONCURRENCY` and
    /// `FLEETPKG_TEMP_DIR` when set
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable whose value is unusable.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Some(secs) = env_value("FLEETPKG_SCRIPT_TIMEOUT", |v| {
            v.parse::<u64>().ok().filter(|secs| *secs > 0)
        })? {
            self.scan.script_timeout_secs = secs;
        }

        if let Some(concurrency) = env_value("FLEETPKG_CONCURRENCY", |v| v.parse().ok())? {
            self.scan.concurrency = concurrency;
        }

        if let Some(dir) = env_value("FLEETPKG_TEMP_DIR", |v| {
            (!v.is_empty()).then(|| PathBuf::from(v))
        })? {
            self.paths.temp_dir = Some(dir);
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("scan.script_timeout_secs", self.scan.script_timeout_secs),
            ("scan.tool_timeout_secs", self.scan.tool_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Per-script wall-clock limit
    #[must_use]
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.script_timeout_secs)
    }

    /// Wall-clock limit for archive and registry tools
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.tool_timeout_secs)
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        calculate_concurrency(self.scan.concurrency)
    }

    /// Directory for materialized scripts and extracted package members
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.paths.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Read and convert one environment variable; unset yields `None`
fn env_value<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Result<Option<T>, Error> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match parse(&raw) {
        Some(value) => Ok(Some(value)),
        None => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
        }
        .into()),
    }
}

fn calculate_concurrency(config_value: usize) -> usize {
    if config_value > 0 {
        config_value
    } else {
        num_cpus::get().max(1)
    }
}
