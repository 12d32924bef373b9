//! `PackageInfo` and `Distribution` manifest parsing
//!
//! Flat packages describe their components in XML: a component package has a
//! `PackageInfo` with one `<pkg-info>` element, a product archive has a
//! `Distribution` listing components through `<pkg-ref>` elements. The same
//! id can appear in several `<pkg-ref>` elements (one carrying the version,
//! another the file reference), so references are merged by id.

use fleetpkg_types::{LooseVersion, PackageReceipt};
use percent_encoding::percent_decode_str;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Which kind of manifest was parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Component `PackageInfo` (has `<pkg-info>`)
    PackageInfo,
    /// Product `Distribution` or `.dist` (has `<pkg-ref>`)
    Distribution,
    /// Neither element present
    Empty,
}

/// One `<pkg-info>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgInfo {
    pub identifier: String,
    pub version: String,
    /// `installKBytes` of the `<payload>` child; `None` when there is no payload
    pub payload_kbytes: Option<u64>,
    pub has_payload: bool,
}

/// How a `<pkg-ref>` names its component package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkgReference {
    /// `file:` URL, relative to the directory holding the package
    PackageRelative(String),
    /// Plain or `#`-prefixed reference, relative to the manifest itself
    ManifestRelative(String),
}

impl PkgReference {
    /// Decoded relative path
    pub fn relative_path(&self) -> &str {
        match self {
            Self::PackageRelative(p) | Self::ManifestRelative(p) => p,
        }
    }

    /// Absolute candidate for the referenced component on disk
    pub fn resolve(&self, package_dir: &Path, manifest_dir: &Path) -> PathBuf {
        match self {
            Self::PackageRelative(p) => package_dir.join(p),
            Self::ManifestRelative(p) => manifest_dir.join(p),
        }
    }
}

/// All `<pkg-ref>` elements sharing one id, merged
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PkgRef {
    pub id: String,
    pub version: Option<String>,
    pub install_kbytes: Option<u64>,
    pub reference: Option<PkgReference>,
}

impl PkgRef {
    /// A receipt needs both a version and a component reference
    pub fn to_receipt(&self) -> Option<PackageReceipt> {
        let version = self.version.as_deref()?;
        let reference = self.reference.as_ref()?;
        let mut receipt = PackageReceipt::new(&self.id, version).with_file(reference.relative_path());
        receipt.installed_size_kb = self.install_kbytes;
        Some(receipt)
    }
}

/// `<product>` element of a Distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: Option<String>,
    pub version: Option<String>,
}

/// Parsed manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub pkg_infos: Vec<PkgInfo>,
    /// Merged references in order of first appearance
    pub pkg_refs: Vec<PkgRef>,
    pub product: Option<Product>,
    /// Lowest `<os-version min>` declared
    pub min_os_version: Option<String>,
    pub title: Option<String>,
}

impl Manifest {
    /// Receipts declared directly by the manifest
    ///
    /// Component packages without a payload leave no receipt behind and are
    /// skipped.
    pub fn receipts(&self) -> Vec<PackageReceipt> {
        match self.kind {
            ManifestKind::PackageInfo => {
                let mut receipts: Vec<PackageReceipt> = Vec::new();
                for info in self.pkg_infos.iter().filter(|i| i.has_payload) {
                    let mut receipt = PackageReceipt::new(&info.identifier, &info.version);
                    receipt.installed_size_kb = info.payload_kbytes;
                    if !receipts.contains(&receipt) {
                        receipts.push(receipt);
                    }
                }
                receipts
            }
            ManifestKind::Distribution => {
                self.pkg_refs.iter().filter_map(PkgRef::to_receipt).collect()
            }
            ManifestKind::Empty => Vec::new(),
        }
    }
}

#[derive(Default)]
struct Builder {
    pkg_infos: Vec<PkgInfo>,
    in_pkg_info: bool,
    refs: Vec<PkgRef>,
    ref_index: HashMap<String, usize>,
    open_ref: Option<usize>,
    product: Option<Product>,
    min_os: Option<String>,
    in_title: bool,
    title: Option<String>,
}

impl Builder {
    fn start(&mut self, element: &BytesStart<'_>, empty: bool) -> Result<(), String> {
        match element.local_name().as_ref() {
            b"pkg-info" => {
                let attrs = attributes(element)?;
                if let (Some(identifier), Some(version)) =
                    (attrs.get("identifier"), attrs.get("version"))
                {
                    self.pkg_infos.push(PkgInfo {
                        identifier: identifier.clone(),
                        version: version.clone(),
                        payload_kbytes: None,
                        has_payload: false,
                    });
                    self.in_pkg_info = !empty;
                }
            }
            b"payload" if self.in_pkg_info => {
                let attrs = attributes(element)?;
                if let Some(info) = self.pkg_infos.last_mut() {
                    info.has_payload = true;
                    info.payload_kbytes = attrs.get("installKBytes").and_then(|v| parse_kbytes(v));
                }
            }
            b"pkg-ref" => {
                let attrs = attributes(element)?;
                let Some(id) = attrs.get("id") else {
                    return Ok(());
                };
                let idx = match self.ref_index.get(id) {
                    Some(&idx) => idx,
                    None => {
                        self.refs.push(PkgRef {
                            id: id.clone(),
                            ..PkgRef::default()
                        });
                        self.ref_index.insert(id.clone(), self.refs.len() - 1);
                        self.refs.len() - 1
                    }
                };
                let entry = &mut self.refs[idx];
                if let Some(version) = attrs.get("version") {
                    entry.version = Some(version.clone());
                }
                if let Some(kb) = attrs.get("installKBytes").and_then(|v| parse_kbytes(v)) {
                    entry.install_kbytes = Some(kb);
                }
                self.open_ref = if empty { None } else { Some(idx) };
            }
            b"product" => {
                let attrs = attributes(element)?;
                self.product = Some(Product {
                    id: attrs.get("id").cloned(),
                    version: attrs.get("version").cloned(),
                });
            }
            b"os-version" => {
                let attrs = attributes(element)?;
                if let Some(min) = attrs.get("min") {
                    let lower = match &self.min_os {
                        Some(current) => LooseVersion::parse(min) < LooseVersion::parse(current),
                        None => true,
                    };
                    if lower {
                        self.min_os = Some(min.clone());
                    }
                }
            }
            b"title" if !empty => self.in_title = true,
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"pkg-info" => self.in_pkg_info = false,
            b"pkg-ref" => self.open_ref = None,
            b"title" => self.in_title = false,
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(idx) = self.open_ref {
            if let Some(reference) = parse_reference(text) {
                self.refs[idx].reference = Some(reference);
            }
        } else if self.in_title && self.title.is_none() {
            self.title = Some(text.to_string());
        }
    }

    fn finish(self) -> Manifest {
        let kind = if !self.pkg_infos.is_empty() {
            ManifestKind::PackageInfo
        } else if !self.refs.is_empty() {
            ManifestKind::Distribution
        } else {
            ManifestKind::Empty
        };
        Manifest {
            kind,
            pkg_infos: self.pkg_infos,
            pkg_refs: self.refs,
            product: self.product,
            min_os_version: self.min_os,
            title: self.title,
        }
    }
}

/// Parse `PackageInfo`, `Distribution` or `.dist` XML
///
/// # Errors
///
/// Returns the XML parser's message if the document is malformed.
pub fn parse_manifest(xml: &[u8]) -> Result<Manifest, String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut builder = Builder::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => builder.start(&e, false)?,
            Ok(Event::Empty(e)) => builder.start(&e, true)?,
            Ok(Event::End(e)) => builder.end(e.local_name().as_ref()),
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                builder.text(&text);
            }
            Ok(Event::CData(c)) => builder.text(&String::from_utf8_lossy(&c)),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "error at byte {}: {e}",
                    reader.error_position()
                ))
            }
            Ok(_) => {}
        }
        buf.clear();
    }
    Ok(builder.finish())
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

/// `installKBytes` may be written as a float
fn parse_kbytes(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let kb = f as u64;
                kb
            })
    })
}

/// Decode the text of a `<pkg-ref>`; only references to `.pkg` files count
fn parse_reference(text: &str) -> Option<PkgReference> {
    if !text.ends_with(".pkg") {
        return None;
    }
    if let Some(rest) = text.strip_prefix("file:") {
        let decoded = percent_decode_str(rest).decode_utf8_lossy();
        return Some(PkgReference::PackageRelative(
            decoded.trim_start_matches("./").to_string(),
        ));
    }
    let rest = text.strip_prefix('#').unwrap_or(text);
    let decoded = percent_decode_str(rest).decode_utf8_lossy();
    Some(PkgReference::ManifestRelative(decoded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pkg_refs_merge() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<installer-gui-script minSpecVersion="2">
    <title>Example Tool</title>
    <pkg-ref id="com.example.tool"/>
    <choices-outline>
        <line choice="default"><line choice="com.example.tool"/></line>
    </choices-outline>
    <choice id="com.example.tool" visible="false">
        <pkg-ref id="com.example.tool"/>
    </choice>
    <pkg-ref id="com.example.tool" version="2.4.1" installKBytes="10240" onConclusion="none">#Example%20Tool.pkg</pkg-ref>
    <pkg-ref id="com.example.tool">
        <bundle-version/>
    </pkg-ref>
    <product id="com.example.tool.product" version="2.4"/>
</installer-gui-script>"#;
        let manifest = parse_manifest(xml).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Distribution);
        assert_eq!(manifest.pkg_refs.len(), 1);
        assert_eq!(manifest.title.as_deref(), Some("Example Tool"));

        let receipts = manifest.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].packageid, "com.example.tool");
        assert_eq!(receipts[0].version, "2.4.1");
        assert_eq!(receipts[0].installed_size_kb, Some(10240));
        assert_eq!(
            receipts[0].file.as_deref(),
            Some(Path::new("Example Tool.pkg"))
        );
        assert_eq!(
            manifest.product.and_then(|p| p.version).as_deref(),
            Some("2.4")
        );
    }

    #[test]
    fn test_version_and_file_on_separate_elements() {
        let xml = br#"<installer-gui-script>
    <pkg-ref id="X" version="1.2.3"/>
    <pkg-ref id="X">file:./Contents/Packages/X%20Core.pkg</pkg-ref>
</installer-gui-script>"#;
        let manifest = parse_manifest(xml).unwrap();
        let receipts = manifest.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].version, "1.2.3");
        assert_eq!(
            receipts[0].file.as_deref(),
            Some(Path::new("Contents/Packages/X Core.pkg"))
        );
        assert_eq!(
            manifest.pkg_refs[0].reference,
            Some(PkgReference::PackageRelative(
                "Contents/Packages/X Core.pkg".to_string()
            ))
        );
    }

    #[test]
    fn test_ref_without_version_or_file_is_dropped() {
        let xml = br#"<installer-gui-script>
    <pkg-ref id="A" version="1.0"/>
    <pkg-ref id="B">#B.pkg</pkg-ref>
</installer-gui-script>"#;
        let manifest = parse_manifest(xml).unwrap();
        assert_eq!(manifest.pkg_refs.len(), 2);
        assert!(manifest.receipts().is_empty());
    }

    #[test]
    fn test_package_info_payload() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<pkg-info format-version="2" identifier="com.example.core" version="5.0.1" install-location="/" auth="root">
    <payload numberOfFiles="120" installKBytes="4521.5"/>
    <bundle-version/>
</pkg-info>"#;
        let manifest = parse_manifest(xml).unwrap();
        assert_eq!(manifest.kind, ManifestKind::PackageInfo);
        let receipts = manifest.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].installed_size_kb, Some(4521));
        assert_eq!(receipts[0].file, None);
    }

    #[test]
    fn test_package_info_without_payload_leaves_no_receipt() {
        let xml = br#"<pkg-info identifier="com.example.scripts" version="1.0"><scripts/></pkg-info>"#;
        let manifest = parse_manifest(xml).unwrap();
        assert!(manifest.receipts().is_empty());
    }

    #[test]
    fn test_lowest_os_version_wins() {
        let xml = br#"<installer-gui-script>
    <allowed-os-versions>
        <os-version min="10.15"/>
        <os-version min="10.13.6"/>
    </allowed-os-versions>
</installer-gui-script>"#;
        let manifest = parse_manifest(xml).unwrap();
        assert_eq!(manifest.min_os_version.as_deref(), Some("10.13.6"));
        assert_eq!(manifest.kind, ManifestKind::Empty);
    }

    #[test]
    fn test_malformed_xml() {
        assert!(parse_manifest(b"<pkg-info identifier=\"a\" version=\"1\"><payload></pkg-info>").is_err());
    }
}
