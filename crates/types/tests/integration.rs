//! Integration tests for types

use fleetpkg_types::*;
use proptest::prelude::*;

fn arb_version() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,3}(\\.[0-9]{1,3}){0,4}",
        "[0-9]{1,2}\\.[0-9]{1,2}(a|b|d)[0-9]{1,2}",
        "[0-9]{1,2}\\.[0-9]{1,2}\\.0(\\.0){0,2}",
    ]
}

proptest! {
    /// compare is reflexive
    #[test]
    fn prop_compare_reflexive(a in arb_version()) {
        prop_assert_eq!(compare(&a, &a), VersionComparison::Same);
    }

    /// swapping the operands flips the verdict
    #[test]
    fn prop_compare_antisymmetric(a in arb_version(), b in arb_version()) {
        let expected = match compare(&a, &b) {
            VersionComparison::Older => VersionComparison::Newer,
            VersionComparison::Same => VersionComparison::Same,
            VersionComparison::Newer => VersionComparison::Older,
        };
        prop_assert_eq!(compare(&b, &a), expected);
    }

    /// ordering is transitive across any three versions
    #[test]
    fn prop_compare_transitive(a in arb_version(), b in arb_version(), c in arb_version()) {
        let mut sorted = [LooseVersion::parse(&a), LooseVersion::parse(&b), LooseVersion::parse(&c)];
        sorted.sort();
        prop_assert!(sorted[0] <= sorted[1]);
        prop_assert!(sorted[1] <= sorted[2]);
        prop_assert!(sorted[0] <= sorted[2]);
    }

    /// trailing zero components never change the comparison
    #[test]
    fn prop_padding_is_neutral(a in arb_version(), zeros in 1usize..4) {
        let padded = format!("{a}{}", ".0".repeat(zeros));
        prop_assert_eq!(compare(&a, &padded), VersionComparison::Same);
    }

    /// trim yields an equal version
    #[test]
    fn prop_trim_preserves_equality(a in arb_version()) {
        prop_assert_eq!(compare(&trim(&a), &a), VersionComparison::Same);
    }
}

#[test]
fn test_documented_comparisons() {
    assert_eq!(compare("10.15", "10.15.0"), VersionComparison::Same);
    assert_eq!(compare("10.15", "10.15.1"), VersionComparison::Older);
    assert_eq!(compare("10.15.1", "10.15"), VersionComparison::Newer);
    assert_eq!(compare("1.20", "1.2.3"), VersionComparison::Newer);
}

#[test]
fn test_catalog_round_trip_through_json() {
    let yaml = r#"
- name: GoogleChrome
  version: "119.0.6045.105"
  receipts:
    - packageid: com.google.Chrome
      version: "119.0.6045.105"
    - packageid: com.google.Keystone
      version: "1.3"
      optional: 1
  installs:
    - type: application
      path: /Applications/Google Chrome.app
      CFBundleShortVersionString: "119.0.6045.105"
"#;
    let entries = parse_catalog(yaml.as_bytes(), "chrome.yaml").unwrap();
    let item = entries[0].item.as_ref().unwrap();
    assert!(item.receipts[1].optional);
    assert_eq!(item.installs[0].kind, InstallsKind::Application);

    let json = serde_json::to_string(item).unwrap();
    let back: CatalogItem = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, item);
}

#[test]
fn test_load_catalog_missing_file() {
    let err = load_catalog(std::path::Path::new("/nonexistent/catalog.plist")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/catalog.plist"));
}

#[test]
fn test_install_state_labels() {
    assert!(!InstallState::ThisVersionNotInstalled.is_satisfied());
    assert!(InstallState::NewerVersionInstalled.is_satisfied());
    assert_eq!(
        serde_json::to_string(&InstallState::ThisVersionInstalled).unwrap(),
        "\"this_version_installed\""
    );
}
