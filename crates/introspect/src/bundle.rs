//! Bundle-style installer packages and their Info.plist / legacy `.info` data

use fleetpkg_errors::PackageError;
use fleetpkg_types::PackageReceipt;
use plist::{Dictionary, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::distribution;

/// Version assumed when a bundle declares none
pub const UNKNOWN_VERSION: &str = "0.0.0.0.0";

/// Composer writes this instead of `CFBundleShortVersionString`
const COMPOSER_SHORT_VERSION_KEY: &str = "Bundle versions string, short";

/// Where component packages live inside a bundle metapackage
const COMPONENT_SEARCH_DIRS: [&str; 6] = [
    "",
    "Contents",
    "Contents/Installers",
    "Contents/Packages",
    "Contents/Resources",
    "Contents/Resources/Packages",
];

/// `Info.plist` of a bundle, from `Contents/` or the older `Resources/`
pub fn read_bundle_info(bundle: &Path) -> Option<Dictionary> {
    [
        bundle.join("Contents").join("Info.plist"),
        bundle.join("Resources").join("Info.plist"),
    ]
    .iter()
    .filter(|p| p.is_file())
    .find_map(|p| Value::from_file(p).ok()?.into_dictionary())
}

/// Read any plist file as a dictionary
///
/// # Errors
///
/// Returns `PackageError::PlistRead` when the file is unreadable or not a
/// dictionary.
pub fn read_plist_dict(path: &Path) -> Result<Dictionary, PackageError> {
    let value = Value::from_file(path).map_err(|e| PackageError::PlistRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    value.into_dictionary().ok_or_else(|| PackageError::PlistRead {
        path: path.display().to_string(),
        message: "top level is not a dictionary".to_string(),
    })
}

/// Extract a usable version string from an Info.plist dictionary
///
/// With an explicit `key`, only that key is consulted. Otherwise
/// `CFBundleShortVersionString` (or Composer's misspelling of it) is tried,
/// then `CFBundleVersion`. A candidate is cut at the first whitespace, has
/// commas turned into periods, and must start with a digit.
pub fn version_from_plist(info: &Dictionary, key: Option<&str>) -> Option<String> {
    if let Some(key) = key {
        return info.get(key).and_then(Value::as_string).and_then(clean_version);
    }
    [
        "CFBundleShortVersionString",
        COMPOSER_SHORT_VERSION_KEY,
        "CFBundleVersion",
    ]
    .iter()
    .filter_map(|k| info.get(*k).and_then(Value::as_string))
    .find_map(clean_version)
}

fn clean_version(raw: &str) -> Option<String> {
    let first = raw.split_whitespace().next()?;
    let version = first.replace(',', ".");
    version
        .starts_with(|c: char| c.is_ascii_digit())
        .then_some(version)
}

/// Version of a bundle, falling back to the legacy `.info` file and then to
/// [`UNKNOWN_VERSION`]
pub fn bundle_version(bundle: &Path, key: Option<&str>) -> String {
    if let Some(version) = read_bundle_info(bundle).and_then(|info| version_from_plist(&info, key))
    {
        return version;
    }
    legacy_info(bundle)
        .and_then(|info| info.get("Version").cloned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// Contents of the first `*.info` file under `Contents/Resources/*.lproj`
/// as key/value pairs, looking in `English.lproj` before any other language
pub fn legacy_info(bundle: &Path) -> Option<HashMap<String, String>> {
    let resources = bundle.join("Contents").join("Resources");
    let mut others: Vec<PathBuf> = fs::read_dir(&resources)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.extension().is_some_and(|ext| ext == "lproj"))
        .filter(|p| p.file_name().is_some_and(|name| name != "English.lproj"))
        .collect();
    others.sort();

    let info = std::iter::once(resources.join("English.lproj"))
        .chain(others)
        .find_map(|lproj| first_info_file(&lproj))?;
    let bytes = fs::read(info).ok()?;
    Some(parse_legacy_info(&decode_legacy_text(&bytes)))
}

fn first_info_file(lproj: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(lproj)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "info"))
        .collect();
    entries.sort();
    entries.into_iter().next()
}

/// Parse `Key value` lines; the key runs to the first tab or space
pub fn parse_legacy_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (key, value) = line.split_once(['\t', ' '])?;
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Legacy `.info` files are UTF-8 or Mac Roman
pub fn decode_legacy_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes
            .iter()
            .map(|&b| {
                if b < 0x80 {
                    char::from(b)
                } else {
                    MAC_ROMAN_HIGH[usize::from(b - 0x80)]
                }
            })
            .collect(),
    }
}

const MAC_ROMAN_HIGH: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è', //
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü', //
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø', //
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø', //
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{a0}', 'À', 'Ã', 'Õ', 'Œ', 'œ', //
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ', //
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô', //
    '\u{f8ff}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ', //
];

/// Receipt for a single bundle component package
///
/// The id comes from `CFBundleIdentifier` (or the legacy `Bundle identifier`
/// key, or the file name); packages with neither an Info.plist nor a legacy
/// `.info` file yield `None`.
pub fn one_package_info(pkg: &Path) -> Option<PackageReceipt> {
    let file_stem = pkg.file_name()?.to_string_lossy().into_owned();

    if let Some(info) = read_bundle_info(pkg) {
        let packageid = ["CFBundleIdentifier", "Bundle identifier"]
            .iter()
            .find_map(|k| info.get(*k).and_then(Value::as_string))
            .map_or_else(|| file_stem.clone(), ToString::to_string);
        let version = bundle_version(pkg, None);
        let mut receipt = PackageReceipt::new(packageid, version);
        receipt.installed_size_kb = info.get("IFPkgFlagInstalledSize").and_then(plist_u64);
        receipt.name = info
            .get("CFBundleName")
            .and_then(Value::as_string)
            .map(ToString::to_string);
        receipt.filename = Some(file_stem);
        return Some(receipt);
    }

    let legacy = legacy_info(pkg)?;
    let name = legacy.get("Title").cloned().unwrap_or_else(|| "UNKNOWN".to_string());
    let version = legacy
        .get("Version")
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| "0.0".to_string());
    let mut receipt = PackageReceipt::new(file_stem.clone(), version);
    receipt.name = Some(name);
    receipt.filename = Some(file_stem);
    Some(receipt)
}

fn plist_u64(value: &Value) -> Option<u64> {
    value
        .as_unsigned_integer()
        .or_else(|| value.as_signed_integer().and_then(|i| u64::try_from(i).ok()))
        .or_else(|| value.as_string().and_then(|s| s.trim().parse().ok()))
}

/// Receipts of a bundle `.pkg` or `.mpkg`, recursing into component packages
///
/// # Errors
///
/// Returns an error if a `.dist` file inside the bundle cannot be parsed.
pub fn bundle_package_receipts(pkg: &Path) -> Result<Vec<PackageReceipt>, PackageError> {
    let mut receipts = Vec::new();
    collect_bundle_receipts(pkg, &mut receipts)?;
    Ok(receipts)
}

fn collect_bundle_receipts(
    pkg: &Path,
    receipts: &mut Vec<PackageReceipt>,
) -> Result<(), PackageError> {
    if pkg.extension().is_some_and(|ext| ext == "pkg") {
        if let Some(receipt) = one_package_info(pkg) {
            push_unique(receipts, receipt);
        }
        return Ok(());
    }

    let contents = pkg.join("Contents");
    if let Some(dist) = first_with_extension(&contents, "dist") {
        let xml = fs::read(&dist).map_err(|e| PackageError::PlistRead {
            path: dist.display().to_string(),
            message: e.to_string(),
        })?;
        let manifest =
            distribution::parse_manifest(&xml).map_err(|message| PackageError::ManifestParse {
                manifest: "Distribution".to_string(),
                path: dist.display().to_string(),
                message,
            })?;
        let mut found = false;
        for pkg_ref in &manifest.pkg_refs {
            let Some(reference) = &pkg_ref.reference else {
                continue;
            };
            let subpackage = reference.resolve(&contents, &contents);
            if subpackage.exists() {
                let before = receipts.len();
                collect_bundle_receipts(&subpackage, receipts)?;
                found |= receipts.len() > before;
            } else if let Some(receipt) = pkg_ref.to_receipt() {
                push_unique(receipts, receipt);
                found = true;
            }
        }
        if found {
            return Ok(());
        }
    }

    let search_dirs: Vec<PathBuf> = match read_bundle_info(pkg)
        .and_then(|info| info.get("IFPkgFlagComponentDirectory").and_then(Value::as_string).map(ToString::to_string))
    {
        Some(component_dir) => vec![contents.join(component_dir.trim_start_matches("../"))],
        None => COMPONENT_SEARCH_DIRS.iter().map(|d| pkg.join(d)).collect(),
    };

    for dir in search_dirs {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.filter_map(Result::ok).map(|e| e.path()).collect();
        children.sort();
        for child in children.into_iter().filter(|c| c.is_dir()) {
            match child.extension().and_then(|e| e.to_str()) {
                Some("pkg") => {
                    if let Some(receipt) = one_package_info(&child) {
                        push_unique(receipts, receipt);
                    }
                }
                Some("mpkg") if child != pkg => collect_bundle_receipts(&child, receipts)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn first_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

pub(crate) fn push_unique(receipts: &mut Vec<PackageReceipt>, receipt: PackageReceipt) {
    if !receipts
        .iter()
        .any(|r| r.packageid == receipt.packageid && r.version == receipt.version)
    {
        receipts.push(receipt);
    }
}
