//! Integration tests for install-state evaluation

#![cfg(unix)]

use fleetpkg_errors::{CatalogError, Error, ScriptError};
use fleetpkg_events::{AppEvent, GeneralEvent, ScanEvent, ScriptEvent};
use fleetpkg_installstate::*;
use fleetpkg_platform::{ProcessIdentity, SystemProcessRunner};
use fleetpkg_scripts::{ScriptEvaluator, ScriptPolicy};
use fleetpkg_types::{
    parse_catalog, CatalogEntry, CatalogItem, InstallState, InstalledReceipts, InstallerType,
    InstallsItem, InstallsKind, ReceiptRequirement, ScriptSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn engine() -> InstallStateEngine {
    let policy = ScriptPolicy::new(ProcessIdentity::current(), Vec::new());
    let scripts = ScriptEvaluator::new(Arc::new(SystemProcessRunner::new()), policy)
        .with_timeout(Duration::from_secs(10));
    InstallStateEngine::new(scripts)
}

fn script(body: &str) -> Option<ScriptSource> {
    Some(ScriptSource::Embedded(format!("#!/bin/sh\n{body}\n")))
}

fn item(name: &str, version: &str) -> CatalogItem {
    CatalogItem {
        name: name.to_string(),
        version: version.to_string(),
        ..CatalogItem::default()
    }
}

fn receipt(packageid: &str, version: &str) -> ReceiptRequirement {
    ReceiptRequirement {
        packageid: packageid.to_string(),
        version: version.to_string(),
        optional: false,
        installed_size: None,
    }
}

fn file_installs(path: &Path) -> InstallsItem {
    InstallsItem {
        kind: InstallsKind::File,
        path: Some(path.to_path_buf()),
        short_version: None,
        bundle_version: None,
        version_string: None,
        version_comparison_key: None,
        minimum_update_version: None,
    }
}

fn empty_ctx() -> ScanContext {
    ScanContext::with_snapshot(InstalledReceipts::new())
}

async fn verdict(item: &CatalogItem, ctx: &ScanContext) -> (InstallState, bool, bool) {
    let report = engine().evaluate(item, ctx).await.unwrap();
    (
        report.state,
        report.some_version_installed,
        report.evidence_this_is_installed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_on_demand_is_never_installed() {
        let dir = tempfile::tempdir().unwrap();
        let marker: PathBuf = dir.path().join("ran");
        let mut on_demand = item("Cleanup", "1.0");
        on_demand.on_demand = true;
        on_demand.installcheck_script = script(&format!("touch '{}'; exit 1", marker.display()));

        let ctx = ScanContext::with_snapshot([("com.example.cleanup", "1.0")].into_iter().collect());
        assert_eq!(
            verdict(&on_demand, &ctx).await,
            (InstallState::ThisVersionNotInstalled, false, false)
        );
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_installcheck_script_decides() {
        let mut needed = item("Agent", "2.0");
        needed.installcheck_script = script("exit 0");
        needed.receipts = vec![receipt("com.example.agent", "2.0")];
        let ctx = ScanContext::with_snapshot([("com.example.agent", "2.0")].into_iter().collect());
        assert_eq!(
            verdict(&needed, &ctx).await,
            (InstallState::ThisVersionNotInstalled, false, false)
        );

        let mut present = item("Agent", "2.0");
        present.installcheck_script = script("exit 1");
        assert_eq!(
            verdict(&present, &empty_ctx()).await,
            (InstallState::ThisVersionInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_version_script_newer() {
        let mut tool = item("Tool", "1.2.3");
        tool.version_script = script("echo 1.20");
        assert_eq!(
            verdict(&tool, &empty_ctx()).await,
            (InstallState::NewerVersionInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_version_script_same_and_older() {
        let mut same = item("Tool", "4.1");
        same.version_script = script("echo 4.1.0");
        assert_eq!(
            verdict(&same, &empty_ctx()).await,
            (InstallState::ThisVersionInstalled, true, true)
        );

        let mut older = item("Tool", "4.1");
        older.version_script = script("echo 3.9");
        assert_eq!(
            verdict(&older, &empty_ctx()).await,
            (InstallState::ThisVersionNotInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_version_script_without_usable_output() {
        for body in ["true", "echo '   '", "echo 1.0; exit 3", "echo unknown"] {
            let mut tool = item("Tool", "1.0");
            tool.version_script = script(body);
            assert_eq!(
                verdict(&tool, &empty_ctx()).await,
                (InstallState::ThisVersionNotInstalled, false, false),
                "version_script body {body:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_startosinstall() {
        let mut upgrade = item("macOS Sonoma", "14.6.1");
        upgrade.installer_type = InstallerType::StartOsInstall;
        // A failing uninstallcheck cannot hide an OS installer
        upgrade.uninstallcheck_script = script("exit 1");

        let older = empty_ctx().with_os_version("13.6.7");
        assert_eq!(
            verdict(&upgrade, &older).await,
            (InstallState::ThisVersionNotInstalled, true, true)
        );
        let same = empty_ctx().with_os_version("14.0");
        assert_eq!(verdict(&upgrade, &same).await.0, InstallState::ThisVersionInstalled);
        // A point release past the installer's major release is newer
        let point = empty_ctx().with_os_version("14.2");
        assert_eq!(verdict(&upgrade, &point).await.0, InstallState::NewerVersionInstalled);
        let newer = empty_ctx().with_os_version("15.0");
        assert_eq!(verdict(&upgrade, &newer).await.0, InstallState::NewerVersionInstalled);
        assert_eq!(
            verdict(&upgrade, &empty_ctx()).await,
            (InstallState::ThisVersionNotInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_installcheck_overrides_os_installer() {
        let mut upgrade = item("macOS Sonoma", "14.6");
        upgrade.installer_type = InstallerType::StartOsInstall;
        upgrade.installcheck_script = script("exit 1");

        let older = empty_ctx().with_os_version("13.0");
        assert_eq!(
            verdict(&upgrade, &older).await,
            (InstallState::ThisVersionInstalled, true, true)
        );

        upgrade.installcheck_script = script("exit 0");
        let newer = empty_ctx().with_os_version("15.0");
        let (state, some_version, _) = verdict(&upgrade, &newer).await;
        assert_eq!(state, InstallState::ThisVersionNotInstalled);
        assert!(!some_version);
    }

    #[tokio::test]
    async fn test_stage_os_installer() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("Install macOS Sonoma.app");

        let mut stage = item("macOS Sonoma", "14.6");
        stage.installer_type = InstallerType::StageOsInstaller;
        stage.installs = vec![file_installs(&staged)];

        let ctx = empty_ctx().with_os_version("13.6");
        assert_eq!(verdict(&stage, &ctx).await.0, InstallState::ThisVersionNotInstalled);

        std::fs::create_dir(&staged).unwrap();
        assert_eq!(verdict(&stage, &ctx).await.0, InstallState::ThisVersionInstalled);

        let current = empty_ctx().with_os_version("14.1");
        assert_eq!(verdict(&stage, &current).await.0, InstallState::NewerVersionInstalled);
    }

    #[tokio::test]
    async fn test_uninstallcheck_only_affects_evidence() {
        let mut removable = item("Plugin", "1.0");
        removable.installcheck_script = script("exit 0");
        removable.uninstallcheck_script = script("exit 0");
        assert_eq!(
            verdict(&removable, &empty_ctx()).await,
            (InstallState::ThisVersionNotInstalled, false, true)
        );

        removable.installcheck_script = script("exit 1");
        removable.uninstallcheck_script = script("exit 1");
        assert_eq!(
            verdict(&removable, &empty_ctx()).await,
            (InstallState::ThisVersionInstalled, true, false)
        );
    }

    #[tokio::test]
    async fn test_receipts_fallback() {
        let mut suite = item("Suite", "3.2");
        suite.receipts = vec![
            receipt("com.example.suite.core", "3.2"),
            receipt("com.example.suite.docs", "3.0"),
        ];

        let current: InstalledReceipts = [
            ("com.example.suite.core", "3.2.0"),
            ("com.example.suite.docs", "3.1"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            verdict(&suite, &ScanContext::with_snapshot(current)).await,
            (InstallState::NewerVersionInstalled, true, true)
        );

        let partial: InstalledReceipts = [("com.example.suite.core", "3.1")].into_iter().collect();
        assert_eq!(
            verdict(&suite, &ScanContext::with_snapshot(partial)).await,
            (InstallState::ThisVersionNotInstalled, false, true)
        );

        assert_eq!(
            verdict(&suite, &empty_ctx()).await,
            (InstallState::ThisVersionNotInstalled, false, false)
        );
    }

    #[tokio::test]
    async fn test_optional_receipts_are_ignored() {
        let mut suite = item("Suite", "3.2");
        suite.receipts = vec![receipt("com.example.suite.core", "3.2"), {
            let mut extras = receipt("com.example.suite.extras", "3.2");
            extras.optional = true;
            extras
        }];
        let ctx = ScanContext::with_snapshot([("com.example.suite.core", "3.2")].into_iter().collect());
        assert_eq!(
            verdict(&suite, &ctx).await,
            (InstallState::ThisVersionInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_installs_items_take_precedence_over_receipts() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("support.dat");

        let mut tool = item("Tool", "1.0");
        tool.installs = vec![file_installs(&support)];
        tool.receipts = vec![receipt("com.example.tool", "1.0")];
        let ctx = ScanContext::with_snapshot([("com.example.tool", "1.0")].into_iter().collect());

        // Receipt evidence still counts for removal
        assert_eq!(
            verdict(&tool, &ctx).await,
            (InstallState::ThisVersionNotInstalled, false, true)
        );

        std::fs::write(&support, b"data").unwrap();
        assert_eq!(
            verdict(&tool, &empty_ctx()).await,
            (InstallState::ThisVersionInstalled, true, true)
        );
    }

    #[tokio::test]
    async fn test_removepackages_ignores_installs_for_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("support.dat");
        std::fs::write(&support, b"data").unwrap();

        let mut tool = item("Tool", "1.0");
        tool.installs = vec![file_installs(&support)];
        tool.receipts = vec![receipt("com.example.tool", "1.0")];
        tool.uninstall_method = Some("removepackages".to_string());

        assert_eq!(
            verdict(&tool, &empty_ctx()).await,
            (InstallState::ThisVersionInstalled, true, false)
        );
    }

    #[tokio::test]
    async fn test_missing_external_script_degrades_to_receipts() {
        let (tx, mut rx) = fleetpkg_events::channel();
        let mut tool = item("Tool", "1.0");
        tool.installcheck_script = Some(ScriptSource::External {
            path: PathBuf::from("/nonexistent/fleetpkg/installcheck"),
        });
        tool.receipts = vec![receipt("com.example.tool", "1.0")];
        let ctx = ScanContext::with_snapshot([("com.example.tool", "1.0")].into_iter().collect());

        let state = engine().with_events(tx).installed_state(&tool, &ctx).await.unwrap();
        assert_eq!(state, InstallState::ThisVersionInstalled);

        let degraded = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, AppEvent::Script(ScriptEvent::Degraded { .. })));
        assert!(degraded);
    }

    #[tokio::test]
    async fn test_invalid_installs_item_is_reported() {
        let (tx, mut rx) = fleetpkg_events::channel();
        let mut tool = item("Tool", "1.0");
        let mut broken = file_installs(Path::new("/unused"));
        broken.path = None;
        tool.installs = vec![broken];

        let report = engine()
            .with_events(tx)
            .evaluate(&tool, &empty_ctx())
            .await
            .unwrap();
        assert_eq!(report.state, InstallState::ThisVersionInstalled);
        assert!(!report.some_version_installed);

        let reported = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(
                e,
                AppEvent::General(GeneralEvent::Error { ref message, .. })
                    if message.contains("Tool-1.0")
            )
        });
        assert!(reported);
    }

    #[tokio::test]
    async fn test_scripts_run_once_per_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs");
        let mut tool = item("Tool", "1.0");
        tool.installcheck_script = script(&format!("echo run >> '{}'; exit 1", log.display()));

        engine().evaluate(&tool, &empty_ctx()).await.unwrap();
        let runs = std::fs::read_to_string(&log).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_scan_keeps_order_and_survives_failures() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let insecure = dir.path().join("check.sh");
        std::fs::write(&insecure, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&insecure, std::fs::Permissions::from_mode(0o777)).unwrap();

        let mut refused = item("Refused", "1.0");
        refused.installcheck_script = Some(ScriptSource::External { path: insecure });
        let mut needed = item("Needed", "1.0");
        needed.installcheck_script = script("exit 0");
        let mut present = item("Present", "1.0");
        present.installcheck_script = script("exit 1");
        let entries: Vec<CatalogEntry> = vec![needed.into(), refused.into(), present.into()];

        let (tx, mut rx) = fleetpkg_events::channel();
        let engine = engine().with_events(tx);
        let results = scan_catalog(&engine, &entries, &empty_ctx(), 2).await;

        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.name, "Needed");
        assert_eq!(first.state, InstallState::ThisVersionNotInstalled);
        assert!(matches!(
            results[1],
            Err(Error::Script(ScriptError::InsecurePermissions { .. }))
        ));
        let last = results[2].as_ref().unwrap();
        assert_eq!(last.name, "Present");
        assert_eq!(last.state, InstallState::ThisVersionInstalled);

        let events: Vec<AppEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::Scan(ScanEvent::ItemFailed { item, .. }) if item == "Refused-1.0")));
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::Scan(ScanEvent::Completed {
                evaluated: 2,
                failed: 1,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_scan_reports_rejected_catalog_entries_in_place() {
        let yaml = r#"
- name: Needed
  version: "1.0"
  installcheck_script: |
    #!/bin/sh
    exit 0
- name: Broken
  version: "2.0"
  installs:
    - type: directory
      path: /x
- name: Bare
  version: "3.0"
"#;
        let entries = parse_catalog(yaml.as_bytes(), "catalog.yaml").unwrap();

        let (tx, mut rx) = fleetpkg_events::channel();
        let engine = engine().with_events(tx);
        let results = scan_catalog(&engine, &entries, &empty_ctx(), 2).await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap().state,
            InstallState::ThisVersionNotInstalled
        );
        assert!(matches!(
            results[1],
            Err(Error::Catalog(CatalogError::InvalidItem { .. }))
        ));
        assert_eq!(
            results[2].as_ref().unwrap().state,
            InstallState::ThisVersionInstalled
        );

        let events: Vec<AppEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::Scan(ScanEvent::ItemFailed { item, .. }) if item == "Broken-2.0")));
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::Scan(ScanEvent::Completed {
                evaluated: 2,
                failed: 1,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let report = engine().evaluate(&item("Bare", "1.0"), &empty_ctx()).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "this_version_installed");
        assert_eq!(json["evidence_this_is_installed"], false);
    }
}
