//! Integration tests for check-script evaluation

#![cfg(unix)]

use fleetpkg_errors::{Error, PlatformError, ScriptError};
use fleetpkg_events::{AppEvent, ScriptEvent};
use fleetpkg_platform::{CancellationToken, ProcessIdentity, SystemProcessRunner};
use fleetpkg_scripts::*;
use fleetpkg_types::{InstallState, ScriptKind, ScriptSource};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn evaluator() -> ScriptEvaluator {
    // Trust only this process's own user and group
    let policy = ScriptPolicy::new(ProcessIdentity::current(), Vec::new());
    ScriptEvaluator::new(Arc::new(SystemProcessRunner::new()), policy)
        .with_timeout(Duration::from_secs(10))
}

fn embedded(body: &str) -> ScriptSource {
    ScriptSource::Embedded(format!("#!/bin/sh\n{body}\n"))
}

fn external(dir: &Path, body: &str, mode: u32) -> ScriptSource {
    let path: PathBuf = dir.join("check.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    ScriptSource::External { path }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_installcheck_exit_codes() {
        let eval = evaluator();
        let cancel = CancellationToken::new();
        assert_eq!(
            eval.installcheck("Tool", &embedded("exit 0"), &cancel).await.unwrap(),
            InstallState::ThisVersionNotInstalled
        );
        assert_eq!(
            eval.installcheck("Tool", &embedded("exit 1"), &cancel).await.unwrap(),
            InstallState::ThisVersionInstalled
        );
    }

    #[tokio::test]
    async fn test_uninstallcheck_exit_codes() {
        let eval = evaluator();
        let cancel = CancellationToken::new();
        assert!(eval.uninstallcheck("Tool", &embedded("exit 0"), &cancel).await.unwrap());
        assert!(!eval.uninstallcheck("Tool", &embedded("exit 1"), &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_version_script_output() {
        let eval = evaluator();
        let cancel = CancellationToken::new();
        assert_eq!(
            eval.version("Tool", &embedded("echo '  1.20  '"), &cancel)
                .await
                .unwrap()
                .as_deref(),
            Some("1.20")
        );
        assert_eq!(
            eval.version("Tool", &embedded("echo '   '"), &cancel).await.unwrap(),
            None
        );
        assert_eq!(
            eval.version("Tool", &embedded("echo 1.0; exit 2"), &cancel).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_trusted_external_script_runs() {
        let dir = tempfile::tempdir().unwrap();
        let source = external(dir.path(), "exit 1", 0o755);
        let state = evaluator()
            .installcheck("Tool", &source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state, InstallState::ThisVersionInstalled);
    }

    #[tokio::test]
    async fn test_world_writable_script_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = external(dir.path(), "touch ran", 0o777);
        let (tx, mut rx) = fleetpkg_events::channel();

        let err = evaluator()
            .with_events(tx)
            .run("Tool", ScriptKind::InstallCheck, &source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
        assert!(!err.is_soft_script_failure());
        assert!(!dir.path().join("ran").exists());

        let refused = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, AppEvent::Script(ScriptEvent::Refused { .. })));
        assert!(refused);
    }

    #[tokio::test]
    async fn test_non_executable_script_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = external(dir.path(), "exit 0", 0o644);
        let err = evaluator()
            .installcheck("Tool", &source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_external_script_is_soft() {
        let source = ScriptSource::External {
            path: PathBuf::from("/nonexistent/fleetpkg/check.sh"),
        };
        let err = evaluator()
            .installcheck("Tool", &source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_soft_script_failure());
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_soft() {
        let eval = evaluator().with_timeout(Duration::from_secs(1));
        let start = Instant::now();
        let err = eval
            .installcheck("Slow", &embedded("sleep 5"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, Error::Platform(PlatformError::Timeout { .. })));
        assert!(err.is_soft_script_failure());
    }
}
