//! Integration tests for the fleetpkg CLI

use std::process::Command;

fn fleetpkg() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fleetpkg"));
    cmd.env_remove("RUST_LOG")
        .env_remove("FLEETPKG_SCRIPT_TIMEOUT")
        .env_remove("FLEETPKG_CONCURRENCY")
        .env_remove("FLEETPKG_TEMP_DIR");
    cmd
}

#[test]
fn test_cli_version() {
    let output = fleetpkg()
        .arg("--version")
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fleetpkg"));
}

#[test]
fn test_cli_help() {
    let output = fleetpkg()
        .arg("--help")
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scan"));
    assert!(stdout.contains("inspect"));
    assert!(stdout.contains("receipts"));
    assert!(stdout.contains("compare"));
}

#[test]
fn test_cli_invalid_command() {
    let output = fleetpkg()
        .arg("invalid-command")
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand"));
}

#[test]
fn test_compare_json() {
    let output = fleetpkg()
        .args(["--json", "compare", "10.15", "10.15.0"])
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["result"], "same");
}

#[test]
fn test_inspect_unsupported_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("Tool.dmg");
    std::fs::write(&image, b"not a package").unwrap();

    let output = fleetpkg()
        .arg("inspect")
        .arg(&image)
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
}

#[cfg(unix)]
#[test]
fn test_scan_yaml_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = dir.path().join("catalog.yaml");
    std::fs::write(
        &catalog,
        r#"
- name: Needed
  version: "1.0"
  installcheck_script: |
    #!/bin/sh
    exit 0
- name: Present
  version: "2.0"
  version_script: |
    #!/bin/sh
    echo 2.1
- name: Portal
  version: "1.0"
  OnDemand: "yes"
"#,
    )
    .unwrap();

    let output = fleetpkg()
        .args(["--json", "scan", "--os-version", "14.4"])
        .arg(&catalog)
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows[0]["report"]["state"], "this_version_not_installed");
    assert_eq!(rows[1]["report"]["state"], "newer_version_installed");
    assert_eq!(rows[2]["report"]["state"], "this_version_not_installed");
    assert_eq!(rows[2]["report"]["some_version_installed"], false);
}

#[test]
fn test_scan_rejects_unparseable_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = dir.path().join("catalog.yaml");
    std::fs::write(&catalog, "- name: [unterminated\n").unwrap();

    let output = fleetpkg()
        .arg("scan")
        .arg(&catalog)
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn test_scan_reports_bad_item_alongside_good_ones() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = dir.path().join("catalog.yaml");
    std::fs::write(
        &catalog,
        r#"
- name: Needed
  version: "1.0"
  installcheck_script: |
    #!/bin/sh
    exit 0
- name: Broken
  version: "2.0"
  installs:
    - type: directory
      path: /Applications/Broken.app
- name: Present
  version: "2.0"
  version_script: |
    #!/bin/sh
    echo 2.0
"#,
    )
    .unwrap();

    let output = fleetpkg()
        .args(["--json", "scan", "--os-version", "14.4"])
        .arg(&catalog)
        .output()
        .expect("Failed to execute fleetpkg");

    assert!(!output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 3);
    assert_eq!(rows[0]["report"]["state"], "this_version_not_installed");
    assert_eq!(rows[1]["item"], "Broken-2.0");
    assert!(rows[1]["report"].is_null());
    assert!(!rows[1]["error"].is_null());
    assert_eq!(rows[2]["report"]["state"], "this_version_installed");
}
