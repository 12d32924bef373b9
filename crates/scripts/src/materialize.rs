//! Writing embedded script bodies to disk

use fleetpkg_errors::ScriptError;
use fleetpkg_types::ScriptKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write `body` into a fresh private directory as an owner-only executable
///
/// The directory is removed when the returned `TempDir` is dropped.
///
/// # Errors
///
/// Returns `ScriptError::MaterializeFailed` if the directory or file cannot
/// be created.
pub async fn materialize(
    body: &str,
    kind: ScriptKind,
    item: &str,
    temp_root: Option<&Path>,
) -> Result<(TempDir, PathBuf), ScriptError> {
    let failed = |message: String| ScriptError::MaterializeFailed {
        script: kind.key().to_string(),
        item: item.to_string(),
        message,
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix("fleetpkg-script-");
    let dir = match temp_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|e| failed(e.to_string()))?;

    let path = dir.path().join(kind.key());
    tokio::fs::write(&path, body.as_bytes())
        .await
        .map_err(|e| failed(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| failed(e.to_string()))?;
    }

    Ok((dir, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialized_script_is_private() {
        let root = tempfile::tempdir().unwrap();
        let (dir, path) = materialize(
            "#!/bin/sh\nexit 0\n",
            ScriptKind::InstallCheck,
            "Tool",
            Some(root.path()),
        )
        .await
        .unwrap();

        assert!(path.starts_with(root.path()));
        assert_eq!(path.file_name().unwrap(), "installcheck_script");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "#!/bin/sh\nexit 0\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        drop(dir);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_root_fails_softly() {
        let err = materialize(
            "#!/bin/sh\n",
            ScriptKind::Version,
            "Tool",
            Some(Path::new("/nonexistent/fleetpkg")),
        )
        .await
        .unwrap_err();
        assert!(err.is_soft());
    }
}
