//! The system package registry: what is installed right now

use async_trait::async_trait;
use fleetpkg_config::Config;
use fleetpkg_errors::{Error, ScanError};
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, PackageEvent};
use fleetpkg_platform::{PlatformCommand, ProcessRunner, Tool, ToolRegistry};
use fleetpkg_types::{InstalledReceipts, PackageReceipt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::{self, UNKNOWN_VERSION};

/// Anything that can produce an installed-receipts snapshot
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Build a fresh `packageid -> version` snapshot
    async fn installed_receipts(&self) -> Result<InstalledReceipts, Error>;
}

/// A fixed snapshot, for callers that already have one
#[async_trait]
impl ReceiptSource for InstalledReceipts {
    async fn installed_receipts(&self) -> Result<InstalledReceipts, Error> {
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    pkgid: Option<String>,
    #[serde(rename = "pkg-version")]
    pkg_version: Option<String>,
}

/// `pkgutil` database plus the legacy bundle receipts directory
#[derive(Clone)]
pub struct SystemReceiptRegistry {
    runner: Arc<dyn ProcessRunner>,
    tools: ToolRegistry,
    tool_timeout: Duration,
    receipts_dir: PathBuf,
    event_sender: Option<EventSender>,
}

impl EventEmitter for SystemReceiptRegistry {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl SystemReceiptRegistry {
    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            tools: ToolRegistry::from_config(&config.tools),
            tool_timeout: config.tool_timeout(),
            receipts_dir: config.paths.receipts_dir.clone(),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    async fn query_pkgutil(&self) -> Result<Vec<(String, String)>, Error> {
        let program = self.tools.resolve(Tool::Pkgutil)?;
        let cmd = PlatformCommand::new(program)
            .args(["--regexp", "--pkg-info-plist", ".*"])
            .timeout(self.tool_timeout);
        let output = self.runner.execute(&cmd).await?.ensure_success(&cmd)?;
        Ok(parse_registry_output(&output.stdout))
    }
}

#[async_trait]
impl ReceiptSource for SystemReceiptRegistry {
    async fn installed_receipts(&self) -> Result<InstalledReceipts, Error> {
        let mut receipts = InstalledReceipts::new();

        match self.query_pkgutil().await {
            Ok(entries) => {
                self.emit(AppEvent::Package(PackageEvent::RegistryQueried {
                    source: "pkgutil".to_string(),
                    receipts: entries.len(),
                }));
                receipts.extend(entries);
            }
            Err(Error::Platform(err)) if err.is_launch_failure() => {
                tracing::warn!(error = %err, "pkgutil unavailable, using legacy receipts only");
                self.emit_warning_with_context(
                    "package registry unavailable; using legacy receipts only",
                    err.to_string(),
                );
            }
            Err(err) => {
                return Err(ScanError::ReceiptQueryFailed {
                    message: err.to_string(),
                }
                .into())
            }
        }

        let dir = self.receipts_dir.clone();
        let legacy = tokio::task::spawn_blocking(move || legacy_receipts(&dir))
            .await
            .map_err(|e| ScanError::TaskFailed {
                message: e.to_string(),
            })?;
        self.emit(AppEvent::Package(PackageEvent::RegistryQueried {
            source: self.receipts_dir.display().to_string(),
            receipts: legacy.len(),
        }));
        for receipt in legacy {
            receipts.insert(receipt.packageid, receipt.version);
        }

        tracing::debug!(receipts = receipts.len(), "installed receipts snapshot built");
        Ok(receipts)
    }
}

/// Split concatenated property lists, as printed by `pkgutil --pkg-info-plist`
pub fn split_plists(output: &[u8]) -> Vec<&[u8]> {
    const HEADER: &[u8] = b"<?xml";
    const FOOTER: &[u8] = b"</plist>";

    let mut blobs = Vec::new();
    let mut rest = output;
    while let Some(end) = find(rest, FOOTER) {
        let blob = &rest[..end + FOOTER.len()];
        let start = find(blob, HEADER).unwrap_or(0);
        blobs.push(&blob[start..]);
        rest = &rest[end + FOOTER.len()..];
    }
    blobs
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `(packageid, version)` pairs from registry output
///
/// Blobs that fail to parse or lack a package id are skipped; an empty
/// version is recorded as unknown.
pub fn parse_registry_output(output: &[u8]) -> Vec<(String, String)> {
    split_plists(output)
        .into_iter()
        .filter_map(|blob| match plist::from_bytes::<RegistryEntry>(blob) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unparseable registry entry");
                None
            }
        })
        .filter_map(|entry| {
            let pkgid = entry.pkgid.filter(|id| !id.is_empty())?;
            let version = entry
                .pkg_version
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            Some((pkgid, version))
        })
        .collect()
}

/// Bundle receipts under the legacy receipts directory
pub fn legacy_receipts(dir: &Path) -> Vec<PackageReceipt> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "pkg"))
        .collect();
    paths.sort();
    paths
        .iter()
        .filter_map(|p| bundle::one_package_info(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PLISTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>install-location</key>
	<string>/</string>
	<key>pkg-version</key>
	<string>5.2.1</string>
	<key>pkgid</key>
	<string>com.example.first</string>
</dict>
</plist>
<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>pkg-version</key>
	<string></string>
	<key>pkgid</key>
	<string>com.example.second</string>
</dict>
</plist>
"#;

    #[test]
    fn test_split_plists() {
        let blobs = split_plists(TWO_PLISTS.as_bytes());
        assert_eq!(blobs.len(), 2);
        assert!(blobs.iter().all(|b| b.starts_with(b"<?xml")));
        assert!(blobs.iter().all(|b| b.ends_with(b"</plist>")));
    }

    #[test]
    fn test_parse_registry_output() {
        let entries = parse_registry_output(TWO_PLISTS.as_bytes());
        assert_eq!(
            entries,
            vec![
                ("com.example.first".to_string(), "5.2.1".to_string()),
                ("com.example.second".to_string(), UNKNOWN_VERSION.to_string()),
            ]
        );
    }

    #[test]
    fn test_garbage_between_plists_is_skipped() {
        let output = format!("noise</plist>{TWO_PLISTS}");
        assert_eq!(parse_registry_output(output.as_bytes()).len(), 2);
        assert!(parse_registry_output(b"").is_empty());
    }

    #[tokio::test]
    async fn test_fixed_snapshot_source() {
        let snapshot: InstalledReceipts = [("com.example.a", "1.0")].into_iter().collect();
        let copy = snapshot.installed_receipts().await.unwrap();
        assert_eq!(copy.get("com.example.a"), Some("1.0"));
    }
}
