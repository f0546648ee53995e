//! Application configuration for kenect.
//!
//! User config lives at `~/.kenect/kenect.toml`. Caller-supplied values
//! override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KenectError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kenect.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kenect";

// ---------------------------------------------------------------------------
// Config structs (matching kenect.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Knowledge Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Triple store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the Knowledge Engine REST API.
    #[serde(default = "default_engine_url")]
    pub url: String,

    /// Seconds to wait before repolling after an unexpected status.
    #[serde(default = "default_poll_backoff_secs")]
    pub poll_backoff_secs: u64,

    /// Timeout in seconds for non-polling requests. The handle long
    /// poll itself never times out client-side.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            poll_backoff_secs: default_poll_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_engine_url() -> String {
    "http://localhost:8280/rest".into()
}
fn default_poll_backoff_secs() -> u64 {
    2
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SPARQL query endpoint (reads).
    #[serde(default = "default_query_endpoint")]
    pub query_endpoint: String,

    /// SPARQL update endpoint (writes).
    #[serde(default = "default_update_endpoint")]
    pub update_endpoint: String,

    /// What to do when the store answers an update with HTTP 500:
    /// "propagate" surfaces the error, "ignore" logs it and reports
    /// success.
    #[serde(default = "default_on_server_error")]
    pub on_server_error: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_endpoint: default_query_endpoint(),
            update_endpoint: default_update_endpoint(),
            on_server_error: default_on_server_error(),
        }
    }
}

fn default_query_endpoint() -> String {
    "http://localhost:7200/repositories/kb".into()
}
fn default_update_endpoint() -> String {
    "http://localhost:7200/repositories/kb/statements".into()
}
fn default_on_server_error() -> String {
    "propagate".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kenect/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KenectError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kenect/kenect.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| KenectError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KenectError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KenectError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KenectError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KenectError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
