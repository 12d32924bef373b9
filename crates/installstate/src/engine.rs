//! Install-state rules
//!
//! Each query walks a fixed precedence list and the first rule that applies
//! decides. Check scripts run at most once per evaluation and their outcome
//! is shared by all three queries. A script that cannot be launched, times
//! out or cannot be written to disk is skipped and the next rule decides;
//! a script refused by the permission policy fails the item.

use fleetpkg_config::Config;
use fleetpkg_errors::Error;
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, ScriptEvent};
use fleetpkg_platform::ProcessRunner;
use fleetpkg_scripts::{installcheck_state, reported_version, uninstallcheck_present, ScriptEvaluator};
use fleetpkg_types::{
    compare, CatalogItem, InstallState, InstallerType, ScriptKind, ScriptResult, VersionComparison,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::context::ScanContext;
use crate::evidence::{
    compare_installs_item, compare_os_release, compare_receipt, fold_presence, Presence,
};

const REMOVEPACKAGES: &str = "removepackages";

/// All three install-state answers for one catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub name: String,
    pub version: String,
    pub state: InstallState,
    pub some_version_installed: bool,
    pub evidence_this_is_installed: bool,
}

/// Decides whether catalog items are installed on this machine
#[derive(Debug, Clone)]
pub struct InstallStateEngine {
    scripts: ScriptEvaluator,
    event_sender: Option<EventSender>,
}

impl EventEmitter for InstallStateEngine {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl InstallStateEngine {
    pub fn new(scripts: ScriptEvaluator) -> Self {
        Self {
            scripts,
            event_sender: None,
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        Self::new(ScriptEvaluator::from_config(config, runner))
    }

    /// Also forwards script events
    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.scripts = self.scripts.with_events(sender.clone());
        self.event_sender = Some(sender);
        self
    }

    /// Whether this version, a newer one, or neither is installed
    ///
    /// # Errors
    ///
    /// Fails when a check script is refused, when the scan is cancelled, or
    /// when the installed-receipts snapshot cannot be built.
    pub async fn installed_state(
        &self,
        item: &CatalogItem,
        ctx: &ScanContext,
    ) -> Result<InstallState, Error> {
        Evaluation::new(self, item, ctx).installed_state().await
    }

    /// Whether any version of the item is installed
    ///
    /// # Errors
    ///
    /// See [`InstallStateEngine::installed_state`].
    pub async fn some_version_installed(
        &self,
        item: &CatalogItem,
        ctx: &ScanContext,
    ) -> Result<bool, Error> {
        Evaluation::new(self, item, ctx).some_version_installed().await
    }

    /// Whether there is evidence that the item could be removed
    ///
    /// # Errors
    ///
    /// See [`InstallStateEngine::installed_state`].
    pub async fn evidence_this_is_installed(
        &self,
        item: &CatalogItem,
        ctx: &ScanContext,
    ) -> Result<bool, Error> {
        Evaluation::new(self, item, ctx).evidence_this_is_installed().await
    }

    /// Answer all three queries, running each check script at most once
    ///
    /// # Errors
    ///
    /// See [`InstallStateEngine::installed_state`].
    pub async fn evaluate(&self, item: &CatalogItem, ctx: &ScanContext) -> Result<ItemReport, Error> {
        let eval = Evaluation::new(self, item, ctx);
        let state = eval.installed_state().await?;
        let some_version_installed = eval.some_version_installed().await?;
        let evidence_this_is_installed = eval.evidence_this_is_installed().await?;
        Ok(ItemReport {
            name: item.name.clone(),
            version: item.version.clone(),
            state,
            some_version_installed,
            evidence_this_is_installed,
        })
    }
}

/// One item's evaluation with its script outcomes cached
///
/// A cached `None` means the item has no such script or the script
/// degraded; either way the next rule decides.
struct Evaluation<'a> {
    engine: &'a InstallStateEngine,
    item: &'a CatalogItem,
    ctx: &'a ScanContext,
    installcheck: OnceCell<Option<InstallState>>,
    uninstallcheck: OnceCell<Option<bool>>,
    version: OnceCell<Option<Option<String>>>,
}

impl<'a> Evaluation<'a> {
    fn new(engine: &'a InstallStateEngine, item: &'a CatalogItem, ctx: &'a ScanContext) -> Self {
        Self {
            engine,
            item,
            ctx,
            installcheck: OnceCell::new(),
            uninstallcheck: OnceCell::new(),
            version: OnceCell::new(),
        }
    }

    async fn installed_state(&self) -> Result<InstallState, Error> {
        let item = self.item;
        if item.on_demand {
            tracing::debug!(item = %item.name, "OnDemand item must always be installed");
            return Ok(InstallState::ThisVersionNotInstalled);
        }

        if let Some(state) = self.installcheck().await? {
            return Ok(state);
        }

        if item.installer_type.is_os_installer() {
            return Ok(self.os_installer_state());
        }

        if let Some(version) = self.version_script().await? {
            let Some(installed) = version else {
                return Ok(InstallState::ThisVersionNotInstalled);
            };
            let state = match compare(installed, &item.version) {
                VersionComparison::Older => InstallState::ThisVersionNotInstalled,
                VersionComparison::Same => InstallState::ThisVersionInstalled,
                VersionComparison::Newer => InstallState::NewerVersionInstalled,
            };
            tracing::debug!(item = %item.name, installed, declared = %item.version, %state, "version_script decided");
            return Ok(state);
        }

        if !item.installs.is_empty() {
            let mut presences = Vec::with_capacity(item.installs.len());
            for entry in &item.installs {
                match compare_installs_item(entry) {
                    Ok(presence) => presences.push(presence),
                    Err(message) => {
                        // Bad installs data should not trigger endless reinstalls
                        self.invalid_installs_item(&message);
                        return Ok(InstallState::ThisVersionInstalled);
                    }
                }
            }
            return Ok(fold_presence(presences));
        }

        if !item.receipts.is_empty() {
            let installed = self.ctx.receipts().await?;
            return Ok(fold_presence(
                item.receipts.iter().map(|r| compare_receipt(r, &installed)),
            ));
        }

        tracing::debug!(item = %item.name, "no evidence declared; assuming installed");
        Ok(InstallState::ThisVersionInstalled)
    }

    async fn some_version_installed(&self) -> Result<bool, Error> {
        let item = self.item;
        if item.on_demand {
            return Ok(false);
        }

        if let Some(state) = self.installcheck().await? {
            return Ok(state.is_satisfied());
        }

        // Some version of the OS is always installed
        if item.installer_type.is_os_installer() {
            return Ok(true);
        }

        if let Some(version) = self.version_script().await? {
            return Ok(version.is_some());
        }

        if !item.installs.is_empty() {
            for entry in &item.installs {
                match compare_installs_item(entry) {
                    Ok(Presence::Missing) => return Ok(false),
                    Ok(_) => {}
                    Err(message) => {
                        self.invalid_installs_item(&message);
                        return Ok(false);
                    }
                }
            }
            return Ok(true);
        }

        if !item.receipts.is_empty() {
            let installed = self.ctx.receipts().await?;
            return Ok(item
                .receipts
                .iter()
                .all(|r| compare_receipt(r, &installed) != Presence::Missing));
        }

        Ok(true)
    }

    async fn evidence_this_is_installed(&self) -> Result<bool, Error> {
        let item = self.item;
        if item.on_demand {
            return Ok(false);
        }

        if item.installer_type.is_os_installer() {
            return Ok(true);
        }

        if let Some(present) = self.uninstallcheck().await? {
            return Ok(present);
        }

        if let Some(state) = self.installcheck().await? {
            return Ok(state.is_satisfied());
        }

        if let Some(version) = self.version_script().await? {
            return Ok(version.is_some());
        }

        let removepackages = item.uninstall_method.as_deref() == Some(REMOVEPACKAGES);
        if !item.installs.is_empty() && !removepackages {
            // Entries without a path cannot be checked and do not count against
            let all_on_disk = item
                .installs
                .iter()
                .filter_map(|entry| entry.path.as_deref())
                .all(|path| path.symlink_metadata().is_ok());
            if all_on_disk {
                tracing::debug!(item = %item.name, "all installs items found on disk");
                return Ok(true);
            }
        }

        if !item.receipts.is_empty() {
            let installed = self.ctx.receipts().await?;
            let found = item
                .receipts
                .iter()
                .filter(|r| !r.optional)
                .any(|r| installed.contains(&r.packageid));
            if found {
                return Ok(true);
            }
            tracing::debug!(item = %item.name, "installed receipts don't match");
        }

        Ok(false)
    }

    fn invalid_installs_item(&self, message: &str) {
        tracing::error!(item = %self.item.name, %message, "invalid installs item");
        self.engine.emit_error_with_details(
            format!("invalid installs item for {}", self.item.label()),
            message,
        );
    }

    fn os_installer_state(&self) -> InstallState {
        let item = self.item;
        let running = self
            .ctx
            .os_version()
            .map(|os| compare_os_release(os, &item.version));

        match (&item.installer_type, running) {
            (InstallerType::StartOsInstall, Some(VersionComparison::Older) | None) => {
                InstallState::ThisVersionNotInstalled
            }
            (InstallerType::StartOsInstall, Some(VersionComparison::Same)) => {
                InstallState::ThisVersionInstalled
            }
            (_, Some(VersionComparison::Newer | VersionComparison::Same)) => {
                InstallState::NewerVersionInstalled
            }
            // Running OS is older: only a staged installer counts
            _ => match item.installs.first().map(compare_installs_item) {
                Some(Ok(Presence::Same)) => InstallState::ThisVersionInstalled,
                Some(Ok(_)) | None => InstallState::ThisVersionNotInstalled,
                Some(Err(message)) => {
                    self.invalid_installs_item(&message);
                    InstallState::ThisVersionInstalled
                }
            },
        }
    }

    async fn installcheck(&self) -> Result<Option<InstallState>, Error> {
        self.installcheck
            .get_or_try_init(|| self.run_script(ScriptKind::InstallCheck, installcheck_state))
            .await
            .copied()
    }

    async fn uninstallcheck(&self) -> Result<Option<bool>, Error> {
        self.uninstallcheck
            .get_or_try_init(|| self.run_script(ScriptKind::UninstallCheck, uninstallcheck_present))
            .await
            .copied()
    }

    /// `Some(None)` when the script ran but reported no usable version
    async fn version_script(&self) -> Result<Option<Option<&String>>, Error> {
        let outcome = self
            .version
            .get_or_try_init(|| self.run_script(ScriptKind::Version, reported_version))
            .await?;
        Ok(outcome.as_ref().map(Option::as_ref))
    }

    async fn run_script<T>(
        &self,
        kind: ScriptKind,
        verdict: fn(&ScriptResult) -> T,
    ) -> Result<Option<T>, Error> {
        let item = self.item;
        let Some(source) = item.script(kind) else {
            return Ok(None);
        };

        match self
            .engine
            .scripts
            .run(&item.name, kind, source, self.ctx.cancel_token())
            .await
        {
            Ok(result) => {
                tracing::debug!(item = %item.name, script = %kind, exit_code = ?result.exit_code, "script returned");
                Ok(Some(verdict(&result)))
            }
            Err(err) if err.is_soft_script_failure() => {
                tracing::warn!(item = %item.name, script = %kind, error = %err, "script failed; using next rule");
                self.engine.emit(AppEvent::Script(ScriptEvent::Degraded {
                    item: item.name.clone(),
                    kind,
                    reason: err.to_string(),
                }));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
