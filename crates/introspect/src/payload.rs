//! Bill-of-materials listings and application bits from package payloads

use fleetpkg_errors::{Error, PackageError};
use fleetpkg_platform::Tool;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::bundle;
use crate::{PackageIntrospector, PackageKind};

const APP_INFO_PLIST_SUFFIX: &str = ".app/Contents/Info.plist";

/// Application `Info.plist` paths in a BOM listing, normalized
pub fn app_info_plists(listing: &str) -> Vec<PathBuf> {
    listing
        .lines()
        .map(str::trim_end)
        .filter(|line| line.ends_with(APP_INFO_PLIST_SUFFIX))
        .map(normalize)
        .collect()
}

/// Lexical cleanup of a relative path: drop `.`, resolve `..` where possible
fn normalize(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Icon file of an application bundle
///
/// Uses `CFBundleIconFile` (defaulting to the app's name without `.app`) under
/// `Contents/Resources`, adding `.icns` when the name has no extension.
pub fn find_icon_for_app(app: &Path) -> Option<PathBuf> {
    let info = bundle::read_plist_dict(&app.join("Contents").join("Info.plist")).ok()?;
    let app_name = app.file_stem()?.to_string_lossy().into_owned();
    let icon_file = info
        .get("CFBundleIconFile")
        .and_then(plist::Value::as_string)
        .map_or(app_name, ToString::to_string);
    let mut icon = app.join("Contents").join("Resources").join(icon_file);
    if icon.extension().is_none() {
        icon.set_extension("icns");
    }
    icon.exists().then_some(icon)
}

/// `Bom` files inside a bundle package
fn bundle_boms(pkg: &Path) -> Vec<PathBuf> {
    let contents = pkg.join("Contents");
    let mut boms = Vec::new();
    for dir in [contents.clone(), contents.join("Resources")] {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "bom"))
            .collect();
        found.sort();
        boms.extend(found);
    }
    boms
}

/// Component packages of a bundle metapackage, up to three levels below
/// `Contents`
fn bundle_subpackages(pkg: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut children: Vec<PathBuf> = entries.filter_map(Result::ok).map(|e| e.path()).collect();
        children.sort();
        for child in children.into_iter().filter(|c| c.is_dir()) {
            if child
                .extension()
                .is_some_and(|ext| ext == "pkg" || ext == "mpkg")
            {
                out.push(child);
            } else if depth < 3 {
                walk(&child, depth + 1, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(&pkg.join("Contents"), 1, &mut out);
    out
}

impl PackageIntrospector {
    /// Every path listed in the package's bills of materials
    ///
    /// # Errors
    ///
    /// Returns tool failures from `pkgutil` or `lsbom`, and
    /// `PackageError::Unsupported` for `.dist` files.
    pub async fn bom_list(&self, pkg: &Path) -> Result<Vec<String>, Error> {
        let mut paths = Vec::new();
        for (_, listing) in self.bom_listings(pkg).await? {
            paths.extend(listing.lines().map(ToString::to_string));
        }
        Ok(paths)
    }

    /// `(component package name, lsbom output)` for each BOM in the package
    async fn bom_listings(&self, pkg: &Path) -> Result<Vec<(String, String)>, Error> {
        let boms: Vec<PathBuf> = match PackageKind::of(pkg)? {
            PackageKind::Bundle => bundle_boms(pkg),
            PackageKind::Flat => {
                // pkgutil extracts the BOMs into a temporary directory it owns
                let output = self
                    .run_tool(
                        Tool::Pkgutil,
                        vec![OsString::from("--bom"), pkg.as_os_str().to_os_string()],
                        None,
                    )
                    .await?;
                output
                    .stdout_lossy()
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(PathBuf::from)
                    .collect()
            }
            PackageKind::Dist => {
                return Err(PackageError::Unsupported {
                    path: pkg.display().to_string(),
                }
                .into())
            }
        };

        let mut listings = Vec::new();
        for bom in boms {
            let component = bom
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".pkg"))
                .unwrap_or_default();
            match self
                .run_tool(
                    Tool::Lsbom,
                    vec![OsString::from("-s"), bom.as_os_str().to_os_string()],
                    None,
                )
                .await
            {
                Ok(output) => listings.push((component, output.stdout_lossy())),
                Err(err) => {
                    tracing::warn!(bom = %bom.display(), error = %err, "could not list bill of materials");
                }
            }
        }
        Ok(listings)
    }

    /// Extract application icons from a package payload into `dest`
    ///
    /// Returns the paths of the icon files found under `dest`.
    ///
    /// # Errors
    ///
    /// Returns tool failures from listing or expanding the package.
    pub async fn extract_app_icons(&self, pkg: &Path, dest: &Path) -> Result<Vec<PathBuf>, Error> {
        match PackageKind::of(pkg)? {
            PackageKind::Flat => self.flat_app_icons(pkg, dest).await,
            PackageKind::Bundle => self.bundle_app_icons(pkg, dest).await,
            PackageKind::Dist => Err(PackageError::Unsupported {
                path: pkg.display().to_string(),
            }
            .into()),
        }
    }

    async fn flat_app_icons(&self, pkg: &Path, dest: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut by_component: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (component, listing) in self.bom_listings(pkg).await? {
            let plists = app_info_plists(&listing);
            if !plists.is_empty() {
                by_component.entry(component).or_default().extend(plists);
            }
        }
        if by_component.is_empty() {
            return Ok(Vec::new());
        }

        let scratch = self.scratch_dir()?;
        let expanded = scratch.path().join("pkg");
        self.run_tool(
            Tool::Pkgutil,
            vec![
                OsString::from("--expand"),
                pkg.as_os_str().to_os_string(),
                expanded.as_os_str().to_os_string(),
            ],
            None,
        )
        .await?;

        let mut icons = Vec::new();
        for (component, plists) in by_component {
            let archive = expanded.join(&component).join("Payload");
            icons.extend(self.app_icons_from_archive(&archive, &plists, dest).await);
        }
        Ok(icons)
    }

    async fn bundle_app_icons(&self, pkg: &Path, dest: &Path) -> Result<Vec<PathBuf>, Error> {
        let archive_bom = pkg.join("Contents").join("Archive.bom");
        let packages = if archive_bom.is_file() {
            vec![pkg.to_path_buf()]
        } else {
            bundle_subpackages(pkg)
        };

        let mut icons = Vec::new();
        for package in packages {
            let bom = package.join("Contents").join("Archive.bom");
            let listing = match self
                .run_tool(
                    Tool::Lsbom,
                    vec![OsString::from("-s"), bom.as_os_str().to_os_string()],
                    None,
                )
                .await
            {
                Ok(output) => output.stdout_lossy(),
                Err(err) => {
                    tracing::debug!(bom = %bom.display(), error = %err, "no bill of materials");
                    continue;
                }
            };
            let plists = app_info_plists(&listing);
            if plists.is_empty() {
                continue;
            }
            let archive = package.join("Contents").join("Archive.pax.gz");
            icons.extend(self.app_icons_from_archive(&archive, &plists, dest).await);
        }
        Ok(icons)
    }

    /// Unpack app Info.plists and icons from one payload, then locate icons
    async fn app_icons_from_archive(
        &self,
        archive: &Path,
        plists: &[PathBuf],
        dest: &Path,
    ) -> Vec<PathBuf> {
        if !archive.exists() {
            return Vec::new();
        }
        let args = vec![
            OsString::from("-rzf"),
            archive.as_os_str().to_os_string(),
            OsString::from("*.app/Contents/Info.plist"),
            OsString::from("*.app/Contents/Resources/*.icns"),
        ];
        if let Err(err) = self.run_tool(Tool::Pax, args, Some(dest)).await {
            tracing::warn!(archive = %archive.display(), error = %err, "pax could not read payload");
            return Vec::new();
        }
        plists
            .iter()
            .filter_map(|info| {
                let app = dest.join(info).parent()?.parent()?.to_path_buf();
                find_icon_for_app(&app)
            })
            .collect()
    }
}
