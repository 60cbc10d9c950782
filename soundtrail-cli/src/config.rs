//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use soundtrail_core::ProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Base URL of the Soundtrail backend API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Prefer the OS keyring for credentials; falls back to in-memory
    /// storage when the keyring is unavailable.
    #[serde(default = "default_prefer_keyring")]
    pub prefer_keyring: bool,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Music providers this installation can connect to.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

/// One configured music provider plus its OAuth client credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(flatten)]
    pub provider: ProviderConfig,

    /// OAuth client ID issued to this installation.
    pub client_id: String,

    /// OAuth client secret, when the provider requires one.
    pub client_secret: Option<String>,
}

fn default_api_base_url() -> String {
    "https://api.soundtrail.app/v1/".to_string()
}

fn default_prefer_keyring() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            prefer_keyring: default_prefer_keyring(),
            log_level: default_log_level(),
            providers: Vec::new(),
            config_path: PathBuf::new(),
        }
    }
}

/// Load configuration from the default location or create defaults.
pub fn load_config() -> Result<CliConfig> {
    let config_path = project_dirs()
        .map(|d| d.config_dir().join("cli.toml"))
        .unwrap_or_else(|| PathBuf::from("soundtrail.toml"));

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "soundtrail", "soundtrail")
}
