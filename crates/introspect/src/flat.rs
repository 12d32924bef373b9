//! Flat (xar) packages

use fleetpkg_errors::Error;
use fleetpkg_events::EventEmitter;
use fleetpkg_platform::Tool;
use std::ffi::OsString;
use std::path::{Component, Path};

use crate::distribution::ManifestKind;
use crate::{bundle, parse_dist, Inspection, PackageIntrospector};

/// Archive members worth extracting
fn is_manifest_entry(entry: &str) -> bool {
    entry == "PackageInfo"
        || entry.ends_with(".pkg/PackageInfo")
        || (entry.starts_with("Distribution") && !entry.contains('/'))
}

/// Entries that stay inside the extraction directory
fn is_contained(entry: &str) -> bool {
    Path::new(entry)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// Split `xar -tf` output into entry names
pub(crate) fn parse_toc(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl PackageIntrospector {
    /// Receipts of a flat package
    ///
    /// A top-level `PackageInfo` wins outright. Otherwise every
    /// `*.pkg/PackageInfo` component contributes, and only when none do is
    /// the `Distribution` consulted for receipts. The Distribution is parsed
    /// either way for product and OS details.
    pub(crate) async fn flat_package(&self, pkg: &Path, depth: usize) -> Result<Inspection, Error> {
        let listing = self
            .run_tool(
                Tool::Xar,
                vec![OsString::from("-tf"), pkg.as_os_str().to_os_string()],
                None,
            )
            .await?;
        let toc = parse_toc(&listing.stdout_lossy());
        let wanted: Vec<&String> = toc
            .iter()
            .filter(|e| is_manifest_entry(e) && is_contained(e))
            .collect();
        if wanted.is_empty() {
            tracing::debug!(pkg = %pkg.display(), "no PackageInfo or Distribution in archive");
            return Ok(Inspection::default());
        }

        let scratch = self.scratch_dir()?;
        let mut args = vec![OsString::from("-xf"), pkg.as_os_str().to_os_string()];
        args.extend(wanted.iter().map(|e| OsString::from(e.as_str())));
        self.run_tool(Tool::Xar, args, Some(scratch.path())).await?;

        let mut inspection = Inspection::default();
        for entry in &wanted {
            if entry.starts_with("Distribution") {
                continue;
            }
            let member = scratch.path().join(entry.as_str());
            let xml = match tokio::fs::read(&member).await {
                Ok(xml) => xml,
                Err(err) => {
                    tracing::warn!(pkg = %pkg.display(), %entry, error = %err, "extracted PackageInfo unreadable");
                    self.emit_warning_with_context(
                        format!("skipping unreadable {entry} in {}", pkg.display()),
                        err.to_string(),
                    );
                    continue;
                }
            };
            let manifest = parse_dist(&xml, entry, pkg)?;
            if manifest.kind != ManifestKind::PackageInfo {
                continue;
            }
            if entry.as_str() == "PackageInfo" {
                if inspection.receipts.is_empty() {
                    inspection.receipts = manifest.receipts();
                    break;
                }
            } else {
                for receipt in manifest.receipts() {
                    bundle::push_unique(&mut inspection.receipts, receipt);
                }
            }
        }

        if let Some(entry) = wanted.iter().find(|e| e.starts_with("Distribution")) {
            let member = scratch.path().join(entry.as_str());
            let xml = tokio::fs::read(&member)
                .await
                .map_err(|e| Error::io_with_path(&e, &member))?;
            let manifest = parse_dist(&xml, entry, pkg)?;
            if inspection.receipts.is_empty() {
                // `file:` references name packages next to this one
                let package_dir = pkg.parent().unwrap_or_else(|| Path::new("."));
                inspection.receipts = self
                    .distribution_receipts(&manifest, package_dir, None, depth)
                    .await?;
            }
            inspection.distribution = Some(manifest);
        }

        Ok(inspection)
    }
}
