//! Package receipts: what an installer leaves behind, and what the system
//! package registry says is installed

use crate::version::LooseVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A receipt extracted from an installer artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReceipt {
    pub packageid: String,
    pub version: String,
    /// Payload size in KiB, when the package declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_size_kb: Option<u64>,
    /// Component package path relative to the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl PackageReceipt {
    #[must_use]
    pub fn new(packageid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            packageid: packageid.into(),
            version: version.into(),
            installed_size_kb: None,
            file: None,
            name: None,
            filename: None,
        }
    }

    #[must_use]
    pub fn with_installed_size(mut self, kb: u64) -> Self {
        self.installed_size_kb = Some(kb);
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Snapshot of `packageid -> installed version` from the package registry
///
/// Built once per scan and shared read-only between concurrent evaluations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledReceipts {
    receipts: HashMap<String, String>,
}

impl InstalledReceipts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed package, keeping the higher version on conflict
    pub fn insert(&mut self, packageid: impl Into<String>, version: impl Into<String>) {
        let version = version.into();
        self.receipts
            .entry(packageid.into())
            .and_modify(|existing| {
                if LooseVersion::parse(&version) > LooseVersion::parse(existing) {
                    existing.clone_from(&version);
                }
            })
            .or_insert(version);
    }

    /// Installed version of a package, if any
    #[must_use]
    pub fn get(&self, packageid: &str) -> Option<&str> {
        self.receipts.get(packageid).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, packageid: &str) -> bool {
        self.receipts.contains_key(packageid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    /// Entries sorted by package id
    #[must_use]
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .receipts
            .iter()
            .map(|(id, version)| (id.as_str(), version.as_str()))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InstalledReceipts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut receipts = Self::new();
        for (id, version) in iter {
            receipts.insert(id, version);
        }
        receipts
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for InstalledReceipts {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (id, version) in iter {
            self.insert(id, version);
        }
    }
}
