//! Configuration loading and root folder resolution
//!
//! Each service reads an optional TOML file (`~/.config/gct/<module>.toml`, then
//! `/etc/gct/<module>.toml` on Linux). A missing or unreadable file is never fatal:
//! the service logs a warning and starts with compiled defaults.
//!
//! Root folder priority:
//! 1. Command-line argument (highest priority)
//! 2. `GCT_ROOT_FOLDER` (or legacy `GCT_ROOT`) environment variable
//! 3. `root_folder` key in the TOML config
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted before the TOML file
pub const ROOT_FOLDER_ENV: &str = "GCT_ROOT_FOLDER";

/// Shorter alias accepted for older deployments
pub const ROOT_FOLDER_ENV_LEGACY: &str = "GCT_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "gct.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive ("info", "gct_scan=debug", ...)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stderr only when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Tunables for customer barcode matching
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum Levenshtein similarity (0.0-1.0) for a fallback suggestion
    pub suggestion_threshold: f64,
    /// Maximum number of fallback suggestions returned
    pub max_suggestions: usize,
    /// Minimum shorter/longer length ratio for the gated substring strategy
    pub substring_min_ratio: f64,
    /// Substring strategies ignore fragments shorter than this
    pub min_substring_len: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            suggestion_threshold: 0.5,
            max_suggestions: 5,
            substring_min_ratio: 0.6,
            min_substring_len: 4,
        }
    }
}

/// Offline queue / connectivity probe settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OfflineConfig {
    /// Seconds between connectivity probes
    pub probe_interval_secs: u64,
    /// Timeout applied to a single probe request
    pub probe_timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

/// Contents of `<module>.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Root folder holding the database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    /// Base URL of the central scan service used by the offline replay worker
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Organization used when a request does not carry one (device installs)
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Compiled fallbacks used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
        }
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/gct (or /var/lib/gct for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("gct"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gct"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("gct"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gct"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("gct"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gct"))
    } else {
        PathBuf::from("./gct_data")
    }
}

/// Candidate config file locations for a module, most specific first
pub fn config_file_candidates(module_name: &str) -> Vec<PathBuf> {
    let file_name = format!("{}.toml", module_name);
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("gct").join(&file_name));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/gct").join(&file_name));
    }

    candidates
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the module config, degrading to defaults when missing or broken
///
/// An explicit path (from `--config`) is tried alone; otherwise the standard
/// locations are searched in order.
pub fn load_module_config(module_name: &str, explicit: Option<&Path>) -> TomlConfig {
    let candidates = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => config_file_candidates(module_name),
    };

    for path in candidates {
        if !path.exists() {
            continue;
        }
        match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded config: {}", path.display());
                return config;
            }
            Err(e) => {
                warn!("Ignoring config {}: {}", path.display(), e);
            }
        }
    }

    warn!("No config file found for {}, using defaults", module_name);
    TomlConfig::default()
}

/// Root folder resolution (CLI → ENV → TOML → default)
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_FOLDER_ENV_LEGACY] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    info!(module = %self.module_name, "Root folder from {}: {}", var, path);
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = CompiledDefaults::for_current_platform().root_folder;
        info!(module = %self.module_name, "Root folder from compiled default: {}", path.display());
        path
    }
}

/// Creates the root folder and hands out the paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_sections_default_when_absent() {
        let config: TomlConfig = toml::from_str("backend_url = \"http://10.0.0.2:5810\"").unwrap();

        assert_eq!(config.backend_url.as_deref(), Some("http://10.0.0.2:5810"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.matching, MatchingConfig::default());
        assert_eq!(config.offline.probe_interval_secs, 30);
    }

    #[test]
    fn test_partial_matching_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [matching]
            max_suggestions = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.matching.max_suggestions, 3);
        assert_eq!(config.matching.suggestion_threshold, 0.5);
        assert_eq!(config.matching.min_substring_len, 4);
    }

    #[test]
    fn test_cli_arg_wins() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = RootFolderResolver::new("gct-scan")
            .with_cli_arg(Some(PathBuf::from("/from/cli")))
            .with_toml(&config)
            .resolve();

        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_database_path_inside_root() {
        let init = RootFolderInitializer::new(PathBuf::from("/srv/gct"));
        assert_eq!(init.database_path(), PathBuf::from("/srv/gct/gct.db"));
    }
}
