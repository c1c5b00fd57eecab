use docs_mirror::load_config::load_config;
use docs_mirror_core::error::ConfigError;
use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::tempdir;

#[test]
fn loads_yaml_config_with_exclusions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.yaml");
    write(
        &path,
        r#"
mirrors:
  - owner: acme
    repo: widgets
    branch: main
    docsPath: docs
  - owner: acme
    repo: gadgets
    branch: v2
    docsPath: site/content
geminiExclusions:
  - changelog.md
  - temp/*
"#,
    )
    .unwrap();

    let config = load_config(&path).expect("Config should load");
    assert_eq!(config.mirrors.len(), 2);
    assert_eq!(config.mirrors[1].docs_path, "site/content");
    assert_eq!(config.exclusions, vec!["changelog.md", "temp/*"]);
}

#[test]
fn loads_json_config_in_bare_list_form() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.json");
    write(
        &path,
        r#"[{"owner": "acme", "repo": "widgets", "branch": "main", "docsPath": "docs"}]"#,
    )
    .unwrap();

    let config = load_config(&path).expect("Config should load");
    assert_eq!(config.mirrors[0].id(), "acme/widgets");
    assert!(config.exclusions.is_empty());
}

#[test]
fn missing_required_field_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.json");
    write(
        &path,
        r#"{"mirrors": [{"owner": "acme", "repo": "widgets", "branch": "main"}]}"#,
    )
    .unwrap();

    let err = load_config(&path).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("docsPath"), "Missing field expected, got: {msg}");
}

#[test]
fn escaping_docs_path_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.yml");
    write(
        &path,
        "mirrors:\n  - owner: acme\n    repo: widgets\n    branch: main\n    docsPath: ../secrets\n",
    )
    .unwrap();

    assert!(load_config(&path).is_err());
}

#[test]
fn unreadable_file_is_a_typed_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::Read { path: reported, .. }) => assert_eq!(reported, &path),
        other => panic!("Expected ConfigError::Read, got: {other:?}"),
    }
}

#[test]
fn owner_that_escapes_the_tree_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.json");
    write(
        &path,
        r#"[{"owner": "..", "repo": "outside", "branch": "main", "docsPath": "docs"}]"#,
    )
    .unwrap();

    let err = load_config(&path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidSegment { field: "owner", .. })
    ));
}

#[test]
fn invalid_yaml_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.yaml");
    write(&path, b"not-yaml: [:::").unwrap();

    let msg = load_config(&path).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

/// Credentials never come from the config file, so the loader ignores them.
#[test]
#[serial]
fn loader_is_independent_of_credentials() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirrors.json");
    write(&path, r#"{"mirrors": []}"#).unwrap();

    env::set_var("GEMINI_API_KEY", "not-used");
    env::set_var("MIRROR_GIT_TOKEN", "not-used");
    let config = load_config(&path).expect("Empty mirror list is valid");
    env::remove_var("GEMINI_API_KEY");
    env::remove_var("MIRROR_GIT_TOKEN");

    assert!(config.mirrors.is_empty());
}
