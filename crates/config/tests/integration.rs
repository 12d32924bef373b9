//! Integration tests for config

#[cfg(test)]
mod tests {
    use fleetpkg_config::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    // Mutex to ensure env var tests don't run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        std::env::remove_var("FLEETPKG_SCRIPT_TIMEOUT");
        std::env::remove_var("FLEETPKG_CONCURRENCY");
        std::env::remove_var("FLEETPKG_TEMP_DIR");
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[scan]
script_timeout_secs = 15
concurrency = 3

[tools]
xar = "/opt/homebrew/bin/xar"

[paths]
receipts_dir = "/tmp/receipts"

[security]
allowed_script_groups = ["wheel"]
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.script_timeout(), Duration::from_secs(15));
        assert_eq!(config.concurrency(), 3);
        assert_eq!(config.tools.xar, PathBuf::from("/opt/homebrew/bin/xar"));
        assert_eq!(config.tools.lsbom, PathBuf::from(constants::LSBOM));
        assert_eq!(config.paths.receipts_dir, PathBuf::from("/tmp/receipts"));
        assert_eq!(config.security.allowed_script_groups, vec!["wheel"]);
        assert_eq!(config.scan.tool_timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[scan]\nscript_timeout_secs = 0").unwrap();
        assert!(Config::load_from_file(temp_file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        use fleetpkg_errors::UserFacingError;

        let err = Config::load_from_file(std::path::Path::new("/nonexistent/config.toml"))
            .await
            .unwrap_err();
        assert_eq!(err.user_code(), Some("config.not_found"));
    }

    #[tokio::test]
    async fn test_partial_table_keeps_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[scan]\nconcurrency = 4").unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.script_timeout(), Duration::from_secs(60));
        assert_eq!(config.paths.receipts_dir, PathBuf::from(constants::RECEIPTS_DIR));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.script_timeout(), Duration::from_secs(60));
        assert!(config.concurrency() >= 1);
        assert_eq!(
            config.security.allowed_script_groups,
            vec!["wheel".to_string(), "admin".to_string()]
        );
        assert_eq!(config.tools.pkgutil, PathBuf::from("/usr/sbin/pkgutil"));
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("FLEETPKG_SCRIPT_TIMEOUT", "5");
        std::env::set_var("FLEETPKG_CONCURRENCY", "2");
        std::env::set_var("FLEETPKG_TEMP_DIR", "/var/tmp/fleetpkg");

        let mut config = Config::default();
        config.merge_env().unwrap();

        assert_eq!(config.script_timeout(), Duration::from_secs(5));
        assert_eq!(config.concurrency(), 2);
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/fleetpkg"));

        clear_env();
    }

    #[test]
    fn test_invalid_env_value() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("FLEETPKG_SCRIPT_TIMEOUT", "soon");
        let mut config = Config::default();
        assert!(config.merge_env().is_err());

        std::env::set_var("FLEETPKG_SCRIPT_TIMEOUT", "0");
        assert!(config.merge_env().is_err());

        clear_env();
    }
}
