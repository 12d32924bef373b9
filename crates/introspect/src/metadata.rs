//! Catalog-ready metadata for an installer package

use fleetpkg_errors::Error;
use fleetpkg_types::{name_and_version, LooseVersion, PackageReceipt, RestartAction};
use serde::Serialize;
use std::path::Path;

use crate::bundle::{self, UNKNOWN_VERSION};
use crate::{PackageIntrospector, PackageKind};

/// Minimum OS assumed for flat packages that do not declare one
const FLAT_PACKAGE_MINIMUM_OS: &str = "10.5.0";

/// What an import tool needs to describe a package in a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub receipts: Vec<PackageReceipt>,
    /// Sum of the receipts' declared sizes
    pub installed_size_kb: u64,
    pub restart_action: RestartAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Pick the package version from its own metadata and its receipts
///
/// The highest receipt version is used when the package itself has no
/// version, when there is exactly one receipt, or when the highest receipt
/// version extends the package version (`1.2` vs `1.2.3`).
pub fn infer_version(metaversion: &str, receipts: &[PackageReceipt]) -> String {
    let highest = receipts
        .iter()
        .map(|r| r.version.as_str())
        .fold("0.0", |best, v| {
            if LooseVersion::parse(v) > LooseVersion::parse(best) {
                v
            } else {
                best
            }
        });
    if metaversion == UNKNOWN_VERSION || receipts.len() == 1 || highest.starts_with(metaversion) {
        highest.to_string()
    } else {
        metaversion.to_string()
    }
}

impl PackageIntrospector {
    /// Name, version, receipts and install requirements of a package
    ///
    /// # Errors
    ///
    /// Fails when no receipts can be extracted, as
    /// [`PackageIntrospector::receipts`] does.
    pub async fn package_metadata(&self, path: &Path) -> Result<PackageMetadata, Error> {
        let kind = PackageKind::of(path)?;
        let restart_action = self.restart_action(path).await;
        let inspection = self.inspect(path).await?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (name, name_version) = name_and_version(&stem);

        let mut metaversion = if kind == PackageKind::Bundle {
            bundle::bundle_version(path, None)
        } else {
            UNKNOWN_VERSION.to_string()
        };
        if metaversion == UNKNOWN_VERSION && !name_version.is_empty() {
            metaversion = name_version;
        }

        let product = inspection.distribution.as_ref().and_then(|d| d.product.clone());
        let version = product
            .as_ref()
            .and_then(|p| p.version.clone())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| infer_version(&metaversion, &inspection.receipts));

        let minimum_os_version = inspection
            .distribution
            .as_ref()
            .and_then(|d| d.min_os_version.clone())
            .or_else(|| (kind == PackageKind::Flat).then(|| FLAT_PACKAGE_MINIMUM_OS.to_string()));

        let installed_size_kb = inspection
            .receipts
            .iter()
            .filter_map(|r| r.installed_size_kb)
            .sum();

        Ok(PackageMetadata {
            name: if name.is_empty() { stem } else { name },
            version,
            installed_size_kb,
            restart_action,
            minimum_os_version,
            product_id: product.and_then(|p| p.id),
            title: inspection.distribution.and_then(|d| d.title),
            receipts: inspection.receipts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipts(versions: &[&str]) -> Vec<PackageReceipt> {
        versions
            .iter()
            .enumerate()
            .map(|(i, v)| PackageReceipt::new(format!("com.example.{i}"), *v))
            .collect()
    }

    #[test]
    fn test_unknown_metaversion_takes_highest_receipt() {
        assert_eq!(
            infer_version(UNKNOWN_VERSION, &receipts(&["1.0", "1.10", "1.9"])),
            "1.10"
        );
    }

    #[test]
    fn test_single_receipt_wins() {
        assert_eq!(infer_version("7.0", &receipts(&["6.5.2"])), "6.5.2");
    }

    #[test]
    fn test_prefix_rule() {
        assert_eq!(infer_version("2.1", &receipts(&["2.1.4", "1.0"])), "2.1.4");
        assert_eq!(infer_version("3.0", &receipts(&["2.1.4", "1.0"])), "3.0");
    }
}
