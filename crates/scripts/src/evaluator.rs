//! Running check scripts and reading their verdicts

use fleetpkg_config::Config;
use fleetpkg_errors::{Error, PlatformError, ScriptError};
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, ScriptEvent};
use fleetpkg_platform::{CancellationToken, PlatformCommand, ProcessRunner};
use fleetpkg_types::{InstallState, LooseVersion, ScriptKind, ScriptResult, ScriptSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::materialize::materialize;
use crate::policy::ScriptPolicy;

/// `installcheck_script`: exit 0 means the item needs installing
pub fn installcheck_state(result: &ScriptResult) -> InstallState {
    if result.exit_code == Some(0) {
        InstallState::ThisVersionNotInstalled
    } else {
        InstallState::ThisVersionInstalled
    }
}

/// `uninstallcheck_script`: exit 0 means the item is present
pub fn uninstallcheck_present(result: &ScriptResult) -> bool {
    result.exit_code == Some(0)
}

/// `version_script`: the trimmed output, when the script succeeded and
/// printed something that reads as a version
pub fn reported_version(result: &ScriptResult) -> Option<String> {
    if result.exit_code != Some(0) {
        return None;
    }
    let version = result.stdout.trim();
    if version.is_empty() || !LooseVersion::parse(version).has_numeric_component() {
        return None;
    }
    Some(version.to_string())
}

/// Runs a catalog item's check scripts
#[derive(Clone)]
pub struct ScriptEvaluator {
    runner: Arc<dyn ProcessRunner>,
    policy: ScriptPolicy,
    timeout: Duration,
    temp_root: Option<PathBuf>,
    event_sender: Option<EventSender>,
}

impl std::fmt::Debug for ScriptEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEvaluator")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for ScriptEvaluator {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl ScriptEvaluator {
    pub fn new(runner: Arc<dyn ProcessRunner>, policy: ScriptPolicy) -> Self {
        Self {
            runner,
            policy,
            timeout: Duration::from_secs(fleetpkg_config::constants::DEFAULT_SCRIPT_TIMEOUT_SECS),
            temp_root: None,
            event_sender: None,
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            policy: ScriptPolicy::from_config(&config.security),
            timeout: config.script_timeout(),
            temp_root: Some(config.temp_dir()),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one script to completion
    ///
    /// Embedded bodies are written to a private temporary directory first;
    /// external files must pass the permission policy. The script gets no
    /// arguments.
    ///
    /// # Errors
    ///
    /// `ScriptError::InsecurePermissions` when an external script is
    /// refused, `PlatformError::Timeout` when the script overruns, and
    /// launch or cancellation errors from the process runner.
    pub async fn run(
        &self,
        item: &str,
        kind: ScriptKind,
        source: &ScriptSource,
        cancel: &CancellationToken,
    ) -> Result<ScriptResult, Error> {
        let (_scratch, path) = match source {
            ScriptSource::Embedded(body) => {
                let (dir, path) = materialize(body, kind, item, self.temp_root.as_deref()).await?;
                (Some(dir), path)
            }
            ScriptSource::External { path } => {
                if let Err(err) = self.policy.verify(path).await {
                    if let ScriptError::InsecurePermissions { reason, .. } = &err {
                        tracing::error!(item, script = %kind, path = %path.display(), reason = %reason, "refusing insecure script");
                        self.emit(AppEvent::Script(ScriptEvent::Refused {
                            item: item.to_string(),
                            kind,
                            path: path.display().to_string(),
                            reason: reason.clone(),
                        }));
                    }
                    return Err(err.into());
                }
                (None, path.clone())
            }
        };

        self.emit(AppEvent::Script(ScriptEvent::Started {
            item: item.to_string(),
            kind,
        }));

        let cmd = PlatformCommand::new(&path).timeout(self.timeout);
        let output = self.runner.execute_with_cancel(&cmd, cancel).await?;

        self.emit(AppEvent::Script(ScriptEvent::Completed {
            item: item.to_string(),
            kind,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
        }));

        if output.timed_out {
            return Err(PlatformError::Timeout {
                command: format!("{kind} for {item}"),
                timeout_secs: self.timeout.as_secs(),
            }
            .into());
        }
        let result = output.into_script_result();
        tracing::debug!(item, script = %kind, exit_code = ?result.exit_code, "script finished");
        Ok(result)
    }

    /// Verdict of an `installcheck_script`
    ///
    /// # Errors
    ///
    /// See [`ScriptEvaluator::run`].
    pub async fn installcheck(
        &self,
        item: &str,
        source: &ScriptSource,
        cancel: &CancellationToken,
    ) -> Result<InstallState, Error> {
        let result = self.run(item, ScriptKind::InstallCheck, source, cancel).await?;
        Ok(installcheck_state(&result))
    }

    /// Whether an `uninstallcheck_script` reports the item present
    ///
    /// # Errors
    ///
    /// See [`ScriptEvaluator::run`].
    pub async fn uninstallcheck(
        &self,
        item: &str,
        source: &ScriptSource,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let result = self.run(item, ScriptKind::UninstallCheck, source, cancel).await?;
        Ok(uninstallcheck_present(&result))
    }

    /// Installed version reported by a `version_script`, if any
    ///
    /// # Errors
    ///
    /// See [`ScriptEvaluator::run`].
    pub async fn version(
        &self,
        item: &str,
        source: &ScriptSource,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, Error> {
        let result = self.run(item, ScriptKind::Version, source, cancel).await?;
        Ok(reported_version(&result))
    }
}
