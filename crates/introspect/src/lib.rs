#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Installer package introspection for fleetpkg
//!
//! Extracts the receipts an installer artifact will leave behind, from bundle
//! packages (`Info.plist`, legacy `.info`), flat packages (`PackageInfo` and
//! `Distribution` inside a xar archive) and bare `.dist` files. Also reads the
//! system package registry and pulls application icons out of payloads.

pub mod bundle;
pub mod distribution;
mod flat;
pub mod metadata;
pub mod payload;
pub mod registry;

pub use distribution::{parse_manifest, Manifest, ManifestKind, PkgRef, PkgReference};
pub use metadata::{infer_version, PackageMetadata};
pub use registry::{parse_registry_output, split_plists, ReceiptSource, SystemReceiptRegistry};

use fleetpkg_config::Config;
use fleetpkg_errors::{Error, PackageError};
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, FailureContext, PackageEvent};
use fleetpkg_platform::{CommandOutput, PlatformCommand, ProcessRunner, Tool, ToolRegistry};
use fleetpkg_types::{PackageReceipt, RestartAction};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Nesting limit for packages that reference other packages
const MAX_NESTING: usize = 8;

/// Receipts plus the Distribution manifest they came from, if any
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    pub receipts: Vec<PackageReceipt>,
    pub distribution: Option<Manifest>,
}

/// Reads receipts and metadata out of installer packages
#[derive(Clone)]
pub struct PackageIntrospector {
    runner: Arc<dyn ProcessRunner>,
    tools: ToolRegistry,
    tool_timeout: Duration,
    temp_root: Option<PathBuf>,
    event_sender: Option<EventSender>,
}

impl std::fmt::Debug for PackageIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIntrospector")
            .field("tools", &self.tools)
            .field("tool_timeout", &self.tool_timeout)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for PackageIntrospector {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl PackageIntrospector {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            tools: ToolRegistry::default(),
            tool_timeout: Duration::from_secs(fleetpkg_config::constants::DEFAULT_TOOL_TIMEOUT_SECS),
            temp_root: None,
            event_sender: None,
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            tools: ToolRegistry::from_config(&config.tools),
            tool_timeout: config.tool_timeout(),
            temp_root: Some(config.temp_dir()),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Run one of the external tools, failing on timeout or nonzero exit
    pub(crate) async fn run_tool(
        &self,
        tool: Tool,
        args: Vec<OsString>,
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, Error> {
        let program = self.tools.resolve(tool)?;
        let mut cmd = PlatformCommand::new(program)
            .args(args)
            .timeout(self.tool_timeout);
        if let Some(dir) = cwd {
            cmd = cmd.current_dir(dir);
        }
        let output = self.runner.execute(&cmd).await?;
        Ok(output.ensure_success(&cmd)?)
    }

    /// Fresh scratch directory, removed when dropped
    pub(crate) fn scratch_dir(&self) -> Result<TempDir, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fleetpkg-");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| Error::io_with_path(&e, self.temp_root.clone().unwrap_or_default()))
    }

    /// Receipts an installer item will leave behind
    ///
    /// # Errors
    ///
    /// Returns `PackageError::NoReceipts` when a recognized package yields
    /// nothing, `PackageError::Unsupported` for anything that is not a
    /// `.pkg`, `.mpkg` or `.dist`, and tool or I/O errors otherwise.
    pub async fn receipts(&self, path: &Path) -> Result<Vec<PackageReceipt>, Error> {
        Ok(self.inspect(path).await?.receipts)
    }

    /// Receipts plus Distribution details, with inspection events
    ///
    /// # Errors
    ///
    /// Same as [`PackageIntrospector::receipts`].
    pub async fn inspect(&self, path: &Path) -> Result<Inspection, Error> {
        let start = Instant::now();
        self.emit(AppEvent::Package(PackageEvent::InspectionStarted {
            path: path.to_path_buf(),
        }));

        let result = self.collect(path.to_path_buf(), 0).await.and_then(|inspection| {
            if inspection.receipts.is_empty() {
                Err(PackageError::NoReceipts {
                    path: path.display().to_string(),
                }
                .into())
            } else {
                Ok(inspection)
            }
        });

        match &result {
            Ok(inspection) => {
                tracing::debug!(
                    path = %path.display(),
                    receipts = inspection.receipts.len(),
                    "package inspected"
                );
                self.emit(AppEvent::Package(PackageEvent::InspectionCompleted {
                    path: path.to_path_buf(),
                    receipts: inspection.receipts.len(),
                    duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                }));
            }
            Err(err) => {
                self.emit(AppEvent::Package(PackageEvent::InspectionFailed {
                    path: path.to_path_buf(),
                    failure: FailureContext::from_error(err),
                }));
            }
        }
        result
    }

    fn collect(&self, path: PathBuf, depth: usize) -> BoxFuture<'_, Result<Inspection, Error>> {
        async move {
            if depth > MAX_NESTING {
                return Err(PackageError::InvalidFormat {
                    message: format!("packages nested too deeply at {}", path.display()),
                }
                .into());
            }
            let kind = PackageKind::of(&path)?;
            match kind {
                PackageKind::Bundle => {
                    let root = path.clone();
                    let receipts =
                        tokio::task::spawn_blocking(move || bundle::bundle_package_receipts(&root))
                            .await
                            .map_err(|e| Error::internal(format!("bundle inspection task failed: {e}")))??;
                    Ok(Inspection {
                        receipts,
                        distribution: None,
                    })
                }
                PackageKind::Flat => self.flat_package(&path, depth).await,
                PackageKind::Dist => {
                    let xml = tokio::fs::read(&path)
                        .await
                        .map_err(|e| Error::io_with_path(&e, &path))?;
                    let manifest = parse_dist(&xml, "Distribution", &path)?;
                    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
                    let receipts = self
                        .distribution_receipts(&manifest, &dir, Some(&dir), depth)
                        .await?;
                    Ok(Inspection {
                        receipts,
                        distribution: Some(manifest),
                    })
                }
            }
        }
        .boxed()
    }

    /// Receipts named by a Distribution's `<pkg-ref>`s
    ///
    /// References that resolve to a package on disk are inspected in turn;
    /// the rest contribute their own receipt when they carry both a version
    /// and a file. Without a `manifest_dir` the manifest lives inside an
    /// archive and its relative references are never followed.
    pub(crate) async fn distribution_receipts(
        &self,
        manifest: &Manifest,
        package_dir: &Path,
        manifest_dir: Option<&Path>,
        depth: usize,
    ) -> Result<Vec<PackageReceipt>, Error> {
        let mut receipts = Vec::new();
        for pkg_ref in &manifest.pkg_refs {
            let Some(reference) = &pkg_ref.reference else {
                continue;
            };
            let candidate = match (reference, manifest_dir) {
                (PkgReference::ManifestRelative(_), None) => None,
                (_, dir) => Some(reference.resolve(package_dir, dir.unwrap_or(package_dir))),
            };
            let on_disk = match &candidate {
                Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
                None => false,
            };
            if let (true, Some(candidate)) = (on_disk, candidate) {
                let nested = self.collect(candidate, depth + 1).await?;
                for receipt in nested.receipts {
                    bundle::push_unique(&mut receipts, receipt);
                }
            } else if let Some(receipt) = pkg_ref.to_receipt() {
                bundle::push_unique(&mut receipts, receipt);
            }
        }
        Ok(receipts)
    }

    /// Restart requirement reported by `installer -query RestartAction`
    ///
    /// A failed query means no restart.
    pub async fn restart_action(&self, path: &Path) -> RestartAction {
        let args = vec![
            OsString::from("-query"),
            OsString::from("RestartAction"),
            OsString::from("-pkg"),
            path.as_os_str().to_os_string(),
        ];
        match self.run_tool(Tool::Installer, args, None).await {
            Ok(output) => RestartAction::from_installer_output(&output.stdout_lossy()),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "restart action query failed");
                RestartAction::None
            }
        }
    }
}

pub(crate) fn parse_dist(xml: &[u8], manifest: &str, path: &Path) -> Result<Manifest, Error> {
    parse_manifest(xml).map_err(|message| {
        PackageError::ManifestParse {
            manifest: manifest.to_string(),
            path: path.display().to_string(),
            message,
        }
        .into()
    })
}

/// Container formats the introspector understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// Directory-style `.pkg` or `.mpkg`
    Bundle,
    /// xar archive `.pkg` or `.mpkg`
    Flat,
    /// Bare Distribution file
    Dist,
}

impl PackageKind {
    /// Classify an installer item by extension and on-disk shape
    ///
    /// # Errors
    ///
    /// Returns `PackageError::NotFound` for a missing path and
    /// `PackageError::Unsupported` for any other extension.
    pub fn of(path: &Path) -> Result<Self, PackageError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let Some(extension) = extension.filter(|e| matches!(e.as_str(), "pkg" | "mpkg" | "dist"))
        else {
            return Err(PackageError::Unsupported {
                path: path.display().to_string(),
            });
        };
        if !path.exists() {
            return Err(PackageError::NotFound {
                path: path.display().to_string(),
            });
        }
        Ok(match extension.as_str() {
            "dist" => Self::Dist,
            _ if path.is_dir() => Self::Bundle,
            _ => Self::Flat,
        })
    }

    /// Flat archives and `.dist` files are single files
    pub fn is_flat(self) -> bool {
        !matches!(self, Self::Bundle)
    }
}
