//! Application configuration for iatigen.
//!
//! User config lives at `~/.iatigen/iatigen.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IatiError, Result};
use crate::types::DEFAULT_NAMESPACE;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "iatigen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".iatigen";

// ---------------------------------------------------------------------------
// Config structs (matching iatigen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tracking database settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Run behaviour.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External converter invocation.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Destination host settings.
    #[serde(default)]
    pub host: HostConfig,

    /// HTTP client settings for fetching sources.
    #[serde(default)]
    pub http: HttpConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL tracking database.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.iatigen/tracking.db".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Namespace used when none is given.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Seconds allowed for fetching one source.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Seconds allowed for one converter invocation.
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_secs: u64,

    /// Parent directory for per-run staging dirs (system temp dir if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_root: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            fetch_timeout_secs: default_fetch_timeout(),
            conversion_timeout_secs: default_conversion_timeout(),
            staging_root: None,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.into()
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_conversion_timeout() -> u64 {
    300
}

/// `[converter]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Executable that merges a folder of CSV components into one document.
    #[serde(default)]
    pub command: String,

    /// Extra arguments placed before `--domain/--input/--output`.
    #[serde(default)]
    pub args: Vec<String>,
}

/// `[host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directory holding published destination resources.
    #[serde(default = "default_host_root")]
    pub root_dir: String,

    /// Public base URL the root directory is served under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root_dir: default_host_root(),
            public_base_url: None,
        }
    }
}

fn default_host_root() -> String {
    "~/.iatigen/published".into()
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent when fetching sources.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("iatigen/", env!("CARGO_PKG_VERSION")).into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.iatigen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| IatiError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.iatigen/iatigen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IatiError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| IatiError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IatiError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| IatiError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IatiError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that a converter command is configured.
pub fn validate_converter(config: &AppConfig) -> Result<()> {
    if config.converter.command.trim().is_empty() {
        return Err(IatiError::config(
            "no converter configured. Set [converter] command in iatigen.toml",
        ));
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| IatiError::config("could not determine home directory"))?;
            Ok(home.join(rest.trim_start_matches(['/', '\\'])))
        }
        None => Ok(PathBuf::from(path)),
    }
}
