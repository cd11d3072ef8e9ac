//! Tests for configuration loading and root folder resolution
//!
//! Tests that touch GCT_ROOT_FOLDER / GCT_ROOT are marked #[serial] so they do
//! not race each other on the process environment.

use gct_common::config::{
    load_module_config, load_toml_config, CompiledDefaults, RootFolderInitializer,
    RootFolderResolver, TomlConfig, ROOT_FOLDER_ENV, ROOT_FOLDER_ENV_LEGACY,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

fn clear_root_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    env::remove_var(ROOT_FOLDER_ENV_LEGACY);
}

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.root_folder.to_string_lossy().contains("gct"));
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    clear_root_env();

    let resolved = RootFolderResolver::new("gct-scan").resolve();

    assert_eq!(resolved, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    clear_root_env();
    env::set_var(ROOT_FOLDER_ENV, "/tmp/gct-from-env");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/gct-from-toml")),
        ..Default::default()
    };
    let resolved = RootFolderResolver::new("gct-scan").with_toml(&config).resolve();

    clear_root_env();
    assert_eq!(resolved, PathBuf::from("/tmp/gct-from-env"));
}

#[test]
#[serial]
fn test_legacy_env_var_is_honoured() {
    clear_root_env();
    env::set_var(ROOT_FOLDER_ENV_LEGACY, "/tmp/gct-legacy");

    let resolved = RootFolderResolver::new("gct-import").resolve();

    clear_root_env();
    assert_eq!(resolved, PathBuf::from("/tmp/gct-legacy"));
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_env() {
    clear_root_env();

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/gct-from-toml")),
        ..Default::default()
    };
    let resolved = RootFolderResolver::new("gct-scan").with_toml(&config).resolve();

    assert_eq!(resolved, PathBuf::from("/tmp/gct-from-toml"));
}

#[test]
fn test_missing_explicit_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_module_config("gct-scan", Some(&dir.path().join("absent.toml")));

    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_broken_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gct-scan.toml");
    std::fs::write(&path, "[matching\nmax_suggestions = ").unwrap();

    assert!(load_toml_config(&path).is_err());
    assert_eq!(load_module_config("gct-scan", Some(&path)), TomlConfig::default());
}

#[test]
fn test_full_config_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gct-scan.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/var/lib/gct"
backend_url = "https://gct.example.com"
organization_id = "org-42"

[logging]
level = "gct_scan=debug,info"

[matching]
suggestion_threshold = 0.7
max_suggestions = 3

[offline]
probe_interval_secs = 10
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/var/lib/gct")));
    assert_eq!(config.organization_id.as_deref(), Some("org-42"));
    assert_eq!(config.logging.level, "gct_scan=debug,info");
    assert_eq!(config.matching.suggestion_threshold, 0.7);
    assert_eq!(config.matching.max_suggestions, 3);
    assert_eq!(config.offline.probe_interval_secs, 10);
    assert_eq!(config.offline.probe_timeout_secs, 5);
}

#[test]
fn test_initializer_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b");
    let init = RootFolderInitializer::new(root.clone());

    init.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(init.database_path(), root.join("gct.db"));
}
