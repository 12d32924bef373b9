//! Catalog item records and their loader
//!
//! Catalog items arrive as property lists or YAML written by many different
//! admin tools, so loose encodings (integer or string booleans, script bodies
//! versus script paths) are resolved here and the rest of the system only
//! sees typed fields.

use fleetpkg_errors::CatalogError;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How an item gets installed; only the OS-installer kinds change evidence rules
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerType {
    /// Ordinary flat or bundle package
    #[default]
    Package,
    CopyFromDmg,
    Nopkg,
    Profile,
    #[serde(rename = "startosinstall")]
    StartOsInstall,
    StageOsInstaller,
    AppleUpdateMetadata,
    #[serde(other)]
    Other,
}

impl InstallerType {
    /// OS upgrades are evidenced by being staged or triggered, not by receipts
    #[must_use]
    pub fn is_os_installer(&self) -> bool {
        matches!(self, Self::StartOsInstall | Self::StageOsInstaller)
    }
}

/// Restart requirement declared by an item or reported by `installer -query`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartAction {
    #[default]
    None,
    RequireLogout,
    RecommendRestart,
    RequireRestart,
    RequireShutdown,
}

impl RestartAction {
    /// Parse the token printed by the system installer; `None` and unknown
    /// tokens mean no restart.
    #[must_use]
    pub fn from_installer_output(token: &str) -> Self {
        match token.trim() {
            "RequireLogout" => Self::RequireLogout,
            "RecommendRestart" => Self::RecommendRestart,
            "RequireRestart" => Self::RequireRestart,
            "RequireShutdown" => Self::RequireShutdown,
            _ => Self::None,
        }
    }
}

impl fmt::Display for RestartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::RequireLogout => "RequireLogout",
            Self::RecommendRestart => "RecommendRestart",
            Self::RequireRestart => "RequireRestart",
            Self::RequireShutdown => "RequireShutdown",
        };
        f.write_str(text)
    }
}

/// A check script: either an embedded body or an admin-provided file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    Embedded(String),
    External { path: PathBuf },
}

/// Which of the three check scripts is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    InstallCheck,
    UninstallCheck,
    Version,
}

impl ScriptKind {
    /// Catalog key and temp file name for the script
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::InstallCheck => "installcheck_script",
            Self::UninstallCheck => "uninstallcheck_script",
            Self::Version => "version_script",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A package receipt the item expects to leave behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRequirement {
    pub packageid: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "loose_bool")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_size: Option<u64>,
}

/// Kind of filesystem evidence in an `installs` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallsKind {
    Application,
    Bundle,
    Plist,
    File,
}

/// Filesystem evidence that an item is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallsItem {
    #[serde(rename = "type")]
    pub kind: InstallsKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(rename = "CFBundleShortVersionString", default)]
    pub short_version: Option<String>,
    #[serde(rename = "CFBundleVersion", default)]
    pub bundle_version: Option<String>,
    #[serde(rename = "VersionString", default)]
    pub version_string: Option<String>,
    #[serde(default)]
    pub version_comparison_key: Option<String>,
    #[serde(default)]
    pub minimum_update_version: Option<String>,
}

impl InstallsItem {
    /// Info.plist key holding the installed version
    #[must_use]
    pub fn comparison_key(&self) -> &str {
        self.version_comparison_key
            .as_deref()
            .unwrap_or("CFBundleShortVersionString")
    }

    /// Version this entry expects, read from the field named by the comparison key
    #[must_use]
    pub fn expected_version(&self) -> Option<&str> {
        match self.comparison_key() {
            "CFBundleShortVersionString" => self
                .short_version
                .as_deref()
                .or(self.version_string.as_deref()),
            "CFBundleVersion" => self.bundle_version.as_deref(),
            "VersionString" => self
                .version_string
                .as_deref()
                .or(self.short_version.as_deref()),
            _ => None,
        }
    }
}

/// One installable unit from a catalog
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub installer_type: InstallerType,
    #[serde(rename = "OnDemand", default, deserialize_with = "loose_bool")]
    pub on_demand: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installcheck_script: Option<ScriptSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstallcheck_script: Option<ScriptSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_script: Option<ScriptSource>,
    #[serde(default)]
    pub receipts: Vec<ReceiptRequirement>,
    #[serde(default)]
    pub installs: Vec<InstallsItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_os_version: Option<String>,
    #[serde(rename = "RestartAction", default)]
    pub restart_action: RestartAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_method: Option<String>,
}

impl CatalogItem {
    /// Script attached to the item for a given check
    #[must_use]
    pub fn script(&self, kind: ScriptKind) -> Option<&ScriptSource> {
        match kind {
            ScriptKind::InstallCheck => self.installcheck_script.as_ref(),
            ScriptKind::UninstallCheck => self.uninstallcheck_script.as_ref(),
            ScriptKind::Version => self.version_script.as_ref(),
        }
    }

    /// `name-version` label used in logs and reports
    #[must_use]
    pub fn label(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }

    /// Parse a single item from plist or YAML bytes
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::SerializationFormat` when neither format parses
    /// and `CatalogError::InvalidItem` when the item has no name.
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Self, CatalogError> {
        let item: Self = parse_document(bytes, origin)?;
        item.validate()?;
        Ok(item)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::InvalidItem {
                item: self.label(),
                message: "missing name".to_string(),
            });
        }
        Ok(())
    }
}

/// One element of a catalog document: the item, or why it was rejected
///
/// Entries are decoded one at a time so a single malformed item cannot take
/// the rest of the catalog down with it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// `name-version` when the element carries a name, else its position
    pub label: String,
    pub item: Result<CatalogItem, CatalogError>,
}

impl CatalogEntry {
    fn decode<E: fmt::Display>(
        index: usize,
        name: Option<&str>,
        version: Option<&str>,
        decoded: Result<CatalogItem, E>,
    ) -> Self {
        let label = match (name.filter(|n| !n.trim().is_empty()), version) {
            (Some(name), Some(version)) if !version.is_empty() => format!("{name}-{version}"),
            (Some(name), _) => name.to_string(),
            (None, _) => format!("item #{index}"),
        };
        let item = decoded
            .map_err(|e| CatalogError::InvalidItem {
                item: label.clone(),
                message: e.to_string(),
            })
            .and_then(|item| item.validate().map(|()| item));
        Self { label, item }
    }
}

impl From<CatalogItem> for CatalogEntry {
    fn from(item: CatalogItem) -> Self {
        Self {
            label: item.label(),
            item: Ok(item),
        }
    }
}

/// Parse a catalog (an array of items) from plist or YAML bytes
///
/// # Errors
///
/// Returns `CatalogError::SerializationFormat` if the document is not an
/// array in either format. Problems with individual items are reported in
/// their own [`CatalogEntry`].
pub fn parse_catalog(bytes: &[u8], origin: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
    let plist_error = match plist::from_bytes::<Vec<plist::Value>>(bytes) {
        Ok(values) => {
            return Ok(values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    let field = |key: &str| {
                        value
                            .as_dictionary()
                            .and_then(|d| d.get(key))
                            .and_then(plist::Value::as_string)
                    };
                    CatalogEntry::decode(
                        index,
                        field("name"),
                        field("version"),
                        plist::from_value::<CatalogItem>(value),
                    )
                })
                .collect())
        }
        Err(e) => e.to_string(),
    };

    let values: Vec<serde_yml::Value> =
        serde_yml::from_slice(bytes).map_err(|e| CatalogError::SerializationFormat {
            path: origin.to_string(),
            plist_error,
            yaml_error: e.to_string(),
        })?;
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let name = value.get("name").and_then(serde_yml::Value::as_str).map(str::to_owned);
            let version = value.get("version").and_then(serde_yml::Value::as_str).map(str::to_owned);
            CatalogEntry::decode(
                index,
                name.as_deref(),
                version.as_deref(),
                serde_yml::from_value::<CatalogItem>(value),
            )
        })
        .collect())
}

/// Load a catalog file from disk
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a catalog array.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>, CatalogError> {
    let bytes = std::fs::read(path).map_err(|_| CatalogError::NotFound {
        path: path.display().to_string(),
    })?;
    parse_catalog(&bytes, &path.display().to_string())
}

/// Try property list first, then YAML; report both failures if neither works.
///
/// # Errors
///
/// Returns `CatalogError::SerializationFormat` carrying both parser messages.
pub fn parse_document<T: DeserializeOwned>(bytes: &[u8], origin: &str) -> Result<T, CatalogError> {
    let plist_error = match plist::from_bytes::<T>(bytes) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };
    match serde_yml::from_slice::<T>(bytes) {
        Ok(value) => Ok(value),
        Err(e) => Err(CatalogError::SerializationFormat {
            path: origin.to_string(),
            plist_error,
            yaml_error: e.to_string(),
        }),
    }
}

/// Accept `true`, `1`, `"yes"` and friends for boolean keys
fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => Ok(b),
        Loose::Int(i) => Ok(i != 0),
        Loose::Float(f) => Ok(f != 0.0),
        Loose::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"a boolean",
            )),
        },
    }
}
