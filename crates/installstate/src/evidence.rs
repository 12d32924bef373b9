//! Comparing declared evidence with what is on disk

use fleetpkg_introspect::bundle::{read_plist_dict, version_from_plist};
use fleetpkg_types::{
    compare, InstallState, InstalledReceipts, InstallsItem, InstallsKind, ReceiptRequirement,
    VersionComparison,
};
use std::path::{Path, PathBuf};

/// How one piece of evidence relates to the version the item declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Missing,
    Older,
    Same,
    Newer,
}

impl Presence {
    /// Missing or older: the declared version still needs installing
    #[must_use]
    pub fn needs_install(self) -> bool {
        matches!(self, Self::Missing | Self::Older)
    }
}

impl From<VersionComparison> for Presence {
    fn from(comparison: VersionComparison) -> Self {
        match comparison {
            VersionComparison::Older => Self::Older,
            VersionComparison::Same => Self::Same,
            VersionComparison::Newer => Self::Newer,
        }
    }
}

/// Compare one `installs` entry with the filesystem
///
/// # Errors
///
/// Returns a message when the entry itself is unusable: no path, or no
/// expected version for a versioned kind.
pub fn compare_installs_item(item: &InstallsItem) -> Result<Presence, String> {
    let path = item
        .path
        .as_deref()
        .ok_or_else(|| format!("{:?} installs item has no path", item.kind))?;

    match item.kind {
        InstallsKind::File => Ok(if path.symlink_metadata().is_ok() {
            Presence::Same
        } else {
            Presence::Missing
        }),
        InstallsKind::Plist => compare_plist(item, expected_version(item, path)?, path),
        InstallsKind::Application | InstallsKind::Bundle => {
            let expected = expected_version(item, path)?;
            match bundle_info_plist(path) {
                Some(info) => compare_plist(item, expected, &info),
                None => {
                    tracing::debug!(path = %path.display(), "no Info.plist in bundle");
                    Ok(Presence::Missing)
                }
            }
        }
    }
}

fn expected_version<'a>(item: &'a InstallsItem, path: &Path) -> Result<&'a str, String> {
    item.expected_version().ok_or_else(|| {
        format!(
            "installs item {} has no {} to compare",
            path.display(),
            item.comparison_key()
        )
    })
}

fn bundle_info_plist(bundle: &Path) -> Option<PathBuf> {
    [
        bundle.join("Contents").join("Info.plist"),
        bundle.join("Resources").join("Info.plist"),
    ]
    .into_iter()
    .find(|p| p.exists())
}

fn compare_plist(item: &InstallsItem, expected: &str, path: &Path) -> Result<Presence, String> {
    if !path.exists() {
        return Ok(Presence::Missing);
    }
    let info = match read_plist_dict(path) {
        Ok(info) => info,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "unreadable plist");
            return Ok(Presence::Missing);
        }
    };
    let Some(installed) = version_from_plist(&info, item.version_comparison_key.as_deref()) else {
        tracing::debug!(path = %path.display(), "no version info");
        return Ok(Presence::Missing);
    };

    if let Some(minimum) = item.minimum_update_version.as_deref() {
        if compare(&installed, minimum) == VersionComparison::Older {
            tracing::debug!(installed, minimum, "below minimum_update_version");
            return Ok(Presence::Missing);
        }
    }

    let presence = Presence::from(compare(&installed, expected));
    tracing::debug!(path = %path.display(), installed, expected, ?presence, "compared installs item");
    Ok(presence)
}

/// Compare one declared receipt with the installed-receipts snapshot
///
/// Optional receipts always compare as [`Presence::Same`].
pub fn compare_receipt(receipt: &ReceiptRequirement, installed: &InstalledReceipts) -> Presence {
    if receipt.optional {
        return Presence::Same;
    }
    match installed.get(&receipt.packageid) {
        Some(version) => Presence::from(compare(version, &receipt.version)),
        None => Presence::Missing,
    }
}

/// Fold a sequence of presences into a verdict: any missing or older entry
/// means not installed, otherwise any newer entry means newer
pub fn fold_presence(presences: impl IntoIterator<Item = Presence>) -> InstallState {
    let mut newer = false;
    for presence in presences {
        if presence.needs_install() {
            return InstallState::ThisVersionNotInstalled;
        }
        newer |= presence == Presence::Newer;
    }
    if newer {
        InstallState::NewerVersionInstalled
    } else {
        InstallState::ThisVersionInstalled
    }
}

/// The part of an OS version that identifies a release: the major version
/// from 11 on, major.minor before that
pub fn os_release(version: &str) -> String {
    let mut parts = version.trim().split('.');
    let major = parts.next().unwrap_or_default();
    match major.parse::<u32>() {
        Ok(n) if n > 10 => major.to_string(),
        _ => match parts.next() {
            Some(minor) => format!("{major}.{minor}"),
            None => major.to_string(),
        },
    }
}

/// Running OS version compared with the release an OS installer item carries
///
/// Only the item side is reduced with [`os_release`]: a 14.6 installer is
/// release 14, which a machine on 14.2 is already past.
pub fn compare_os_release(running: &str, item_version: &str) -> VersionComparison {
    compare(running, &os_release(item_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::{Dictionary, Value};

    fn installs(kind: InstallsKind, path: &Path) -> InstallsItem {
        InstallsItem {
            kind,
            path: Some(path.to_path_buf()),
            short_version: None,
            bundle_version: None,
            version_string: None,
            version_comparison_key: None,
            minimum_update_version: None,
        }
    }

    fn write_app(root: &Path, name: &str, keys: &[(&str, &str)]) -> PathBuf {
        let app = root.join(name);
        std::fs::create_dir_all(app.join("Contents")).unwrap();
        let mut info = Dictionary::new();
        for (k, v) in keys {
            info.insert((*k).to_string(), Value::String((*v).to_string()));
        }
        Value::Dictionary(info)
            .to_file_xml(app.join("Contents").join("Info.plist"))
            .unwrap();
        app
    }

    #[test]
    fn test_application_versions() {
        let dir = tempfile::tempdir().unwrap();
        let app = write_app(dir.path(), "Editor.app", &[("CFBundleShortVersionString", "2.5")]);

        let mut item = installs(InstallsKind::Application, &app);
        item.short_version = Some("2.5".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Same));

        item.short_version = Some("2.4.9".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Newer));

        item.short_version = Some("2.10".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Older));

        item.path = Some(dir.path().join("Missing.app"));
        assert_eq!(compare_installs_item(&item), Ok(Presence::Missing));
    }

    #[test]
    fn test_version_comparison_key_and_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let app = write_app(
            dir.path(),
            "Tool.app",
            &[("CFBundleShortVersionString", "5.0"), ("CFBundleVersion", "5012")],
        );

        let mut item = installs(InstallsKind::Bundle, &app);
        item.version_comparison_key = Some("CFBundleVersion".to_string());
        item.bundle_version = Some("5012".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Same));

        let mut item = installs(InstallsKind::Application, &app);
        item.short_version = Some("4.0".to_string());
        item.minimum_update_version = Some("6.0".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Missing));
    }

    #[test]
    fn test_plist_and_file_items() {
        let dir = tempfile::tempdir().unwrap();
        let plist_path = dir.path().join("version.plist");
        let mut info = Dictionary::new();
        info.insert(
            "CFBundleShortVersionString".to_string(),
            Value::String("1.2 (build 7)".to_string()),
        );
        Value::Dictionary(info).to_file_xml(&plist_path).unwrap();

        let mut item = installs(InstallsKind::Plist, &plist_path);
        item.version_string = Some("1.2".to_string());
        assert_eq!(compare_installs_item(&item), Ok(Presence::Same));

        let file = installs(InstallsKind::File, &plist_path);
        assert_eq!(compare_installs_item(&file), Ok(Presence::Same));
        let gone = installs(InstallsKind::File, &dir.path().join("gone"));
        assert_eq!(compare_installs_item(&gone), Ok(Presence::Missing));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_counts_as_present() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &link).unwrap();
        assert_eq!(
            compare_installs_item(&installs(InstallsKind::File, &link)),
            Ok(Presence::Same)
        );
    }

    #[test]
    fn test_unusable_items() {
        let mut item = installs(InstallsKind::File, Path::new("/tmp"));
        item.path = None;
        assert!(compare_installs_item(&item).is_err());

        let versionless = installs(InstallsKind::Application, Path::new("/Applications/X.app"));
        assert!(compare_installs_item(&versionless).is_err());
    }

    #[test]
    fn test_receipts() {
        let installed: InstalledReceipts = [("com.example.core", "3.1")].into_iter().collect();
        let mut receipt = ReceiptRequirement {
            packageid: "com.example.core".to_string(),
            version: "3.1.0".to_string(),
            optional: false,
            installed_size: None,
        };
        assert_eq!(compare_receipt(&receipt, &installed), Presence::Same);

        receipt.version = "3.2".to_string();
        assert_eq!(compare_receipt(&receipt, &installed), Presence::Older);

        receipt.packageid = "com.example.extras".to_string();
        assert_eq!(compare_receipt(&receipt, &installed), Presence::Missing);

        receipt.optional = true;
        assert_eq!(compare_receipt(&receipt, &installed), Presence::Same);
    }

    #[test]
    fn test_fold_presence() {
        use Presence::*;
        assert_eq!(fold_presence([]), InstallState::ThisVersionInstalled);
        assert_eq!(fold_presence([Same, Newer]), InstallState::NewerVersionInstalled);
        assert_eq!(fold_presence([Newer, Older]), InstallState::ThisVersionNotInstalled);
        assert_eq!(fold_presence([Same, Missing]), InstallState::ThisVersionNotInstalled);
    }

    #[test]
    fn test_os_release() {
        assert_eq!(os_release("10.15.7"), "10.15");
        assert_eq!(os_release("14.2.1"), "14");
        assert_eq!(os_release("11"), "11");
        assert_eq!(compare_os_release("14.0", "14.6"), VersionComparison::Same);
        assert_eq!(compare_os_release("14.2", "14.6"), VersionComparison::Newer);
        assert_eq!(compare_os_release("13.6", "14.0"), VersionComparison::Older);
        assert_eq!(compare_os_release("10.14", "10.14.6"), VersionComparison::Same);
        assert_eq!(compare_os_release("10.14.6", "10.14.6"), VersionComparison::Newer);
        assert_eq!(compare_os_release("10.15.7", "10.14.6"), VersionComparison::Newer);
    }
}
