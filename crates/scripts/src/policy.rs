//! Who may own an external check script
//!
//! External scripts run with the agent's privileges, so they are refused
//! unless an administrator controls them: owned by root or the effective
//! user, grouped to an administrative group, executable, and not writable
//! by everyone.

use fleetpkg_config::SecurityConfig;
use fleetpkg_errors::ScriptError;
use fleetpkg_platform::{group_ids, ProcessIdentity};
use std::io::ErrorKind;
use std::path::Path;

const WORLD_WRITABLE: u32 = 0o002;
const ANY_EXECUTE: u32 = 0o111;

/// Ownership and mode bits of a script file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFacts {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Owners and groups trusted to provide scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPolicy {
    pub identity: ProcessIdentity,
    /// Administrative group ids, e.g. wheel and admin
    pub allowed_gids: Vec<u32>,
}

impl ScriptPolicy {
    pub fn new(identity: ProcessIdentity, allowed_gids: Vec<u32>) -> Self {
        Self {
            identity,
            allowed_gids,
        }
    }

    /// Policy for this process, resolving the configured group names
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(
            ProcessIdentity::current(),
            group_ids(&config.allowed_script_groups),
        )
    }

    /// Decide whether a file with these facts may run
    ///
    /// # Errors
    ///
    /// Returns the reason for refusal.
    pub fn check(&self, facts: FileFacts) -> Result<(), String> {
        if facts.uid != 0 && facts.uid != self.identity.euid {
            return Err(format!(
                "owner uid {} is neither root nor the current user ({})",
                facts.uid, self.identity.euid
            ));
        }
        if !self.allowed_gids.contains(&facts.gid) && facts.gid != self.identity.egid {
            return Err(format!(
                "group gid {} is not an administrative group",
                facts.gid
            ));
        }
        if facts.mode & WORLD_WRITABLE != 0 {
            return Err("file is world-writable".to_string());
        }
        if facts.mode & ANY_EXECUTE == 0 {
            return Err("file is not executable".to_string());
        }
        Ok(())
    }

    /// Stat `path` and apply [`ScriptPolicy::check`]
    ///
    /// # Errors
    ///
    /// `ScriptError::NotFound` if the file is missing, `VerifyFailed` if it
    /// cannot be examined, `InsecurePermissions` if the policy refuses it.
    pub async fn verify(&self, path: &Path) -> Result<(), ScriptError> {
        let facts = file_facts(path).await?;
        self.check(facts)
            .map_err(|reason| ScriptError::InsecurePermissions {
                path: path.display().to_string(),
                reason,
            })
    }
}

#[cfg(unix)]
async fn file_facts(path: &Path) -> Result<FileFacts, ScriptError> {
    use std::os::unix::fs::MetadataExt;

    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ScriptError::NotFound {
            path: path.display().to_string(),
        },
        _ => ScriptError::VerifyFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        },
    })?;
    if !metadata.is_file() {
        return Err(ScriptError::InsecurePermissions {
            path: path.display().to_string(),
            reason: "not a regular file".to_string(),
        });
    }
    Ok(FileFacts {
        uid: metadata.uid(),
        gid: metadata.gid(),
        mode: metadata.mode(),
    })
}

#[cfg(not(unix))]
async fn file_facts(path: &Path) -> Result<FileFacts, ScriptError> {
    match tokio::fs::metadata(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Err(ScriptError::NotFound {
            path: path.display().to_string(),
        }),
        _ => Err(ScriptError::VerifyFailed {
            path: path.display().to_string(),
            message: "file ownership is only available on unix".to_string(),
        }),
    }
}
